use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct City {
    pub id: i64,
    pub name: String,
    pub country: String,
}

impl City {
    /// "Name, Country" for list display
    pub fn display_name(&self) -> String {
        if self.country.is_empty() {
            self.name.clone()
        } else {
            format!("{}, {}", self.name, self.country)
        }
    }
}

/// Payload for creating or updating a city.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct NewCity {
    pub name: String,
    pub country: String,
}

impl NewCity {
    pub fn new(name: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            country: country.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        let city = City {
            id: 1,
            name: "Oslo".to_string(),
            country: "Norway".to_string(),
        };
        assert_eq!(city.display_name(), "Oslo, Norway");

        let city = City {
            country: String::new(),
            ..city
        };
        assert_eq!(city.display_name(), "Oslo");
    }
}
