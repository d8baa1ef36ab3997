use chrono::NaiveDate;

use super::{ToolAdapter, ToolError};

/// Answers with the current date, e.g. `Today is Monday, January 30, 2023.`
///
/// Takes no argument. A fixed date keeps generated datasets reproducible.
#[derive(Clone, Copy, Debug)]
pub struct Calendar {
    today: Option<NaiveDate>,
}

impl Calendar {
    /// Use the local system date at invocation time.
    pub fn system() -> Self {
        Self { today: None }
    }

    pub fn fixed(today: NaiveDate) -> Self {
        Self { today: Some(today) }
    }
}

impl ToolAdapter for Calendar {
    fn name(&self) -> &str {
        "Calendar"
    }

    fn description(&self) -> &str {
        "Returns today's date. Called as Calendar()."
    }

    fn invoke(&self, argument: &str) -> Result<String, ToolError> {
        if !argument.trim().is_empty() {
            return Err(ToolError::InvalidArgument {
                tool: self.name().to_string(),
                message: format!("takes no argument, got {argument:?}"),
            });
        }
        let today = self
            .today
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        Ok(format!("Today is {}.", today.format("%A, %B %-d, %Y")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_date() {
        let date = NaiveDate::from_ymd_opt(2023, 1, 30).unwrap();
        let out = Calendar::fixed(date).invoke("").unwrap();
        assert_eq!(out, "Today is Monday, January 30, 2023.");
    }

    #[test]
    fn test_rejects_arguments() {
        assert!(matches!(
            Calendar::system().invoke("tomorrow"),
            Err(ToolError::InvalidArgument { .. })
        ));
        assert!(Calendar::system().invoke(" ").is_ok());
    }
}
