use std::ops::RangeInclusive;

use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::Category;

/// Named age bracket tables. The retreat has run with two different tables,
/// so the active one is chosen explicitly in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BracketProfile {
    /// Kids 8–12, Teens 13–18. Used for final review and persistence.
    #[default]
    Retreat,
    /// Kids 7–12, Teens 13–25. The wider window the sign-up form once accepted.
    Intake,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryBrackets {
    pub junior: RangeInclusive<u32>,
    pub senior: RangeInclusive<u32>,
}

impl BracketProfile {
    pub fn brackets(self) -> CategoryBrackets {
        match self {
            Self::Retreat => CategoryBrackets {
                junior: 8..=12,
                senior: 13..=18,
            },
            Self::Intake => CategoryBrackets {
                junior: 7..=12,
                senior: 13..=25,
            },
        }
    }
}

impl CategoryBrackets {
    pub fn min_age(&self) -> u32 {
        *self.junior.start().min(self.senior.start())
    }

    pub fn max_age(&self) -> u32 {
        *self.junior.end().max(self.senior.end())
    }

    pub fn is_eligible(&self, age: u32) -> bool {
        derive_category(age, self).is_some()
    }
}

/// Whole years between `date_of_birth` and `today`. Birthdays later in the
/// year than today do not count yet. Dates in the future yield `None`.
pub fn derive_age(date_of_birth: NaiveDate, today: NaiveDate) -> Option<u32> {
    let mut years = today.year() - date_of_birth.year();
    if (today.month(), today.day()) < (date_of_birth.month(), date_of_birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

/// Same as [`derive_age`] for raw form input; blank or unparseable input is `None`.
pub fn derive_age_str(date_of_birth: Option<&str>, today: NaiveDate) -> Option<u32> {
    let raw = date_of_birth?.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    derive_age(parsed, today)
}

pub fn derive_category(age: u32, brackets: &CategoryBrackets) -> Option<Category> {
    if brackets.junior.contains(&age) {
        Some(Category::Junior)
    } else if brackets.senior.contains(&age) {
        Some(Category::Senior)
    } else {
        None
    }
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}
