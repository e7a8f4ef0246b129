//! A terminal chat assistant that can search the web, look up stock
//! quotes, do arithmetic, manage a Google Calendar and find videos.
//!
//! The crate includes a CLI for chatting in the terminal, and can also be
//! used as a library through [`SessionBuilder`].

#![deny(missing_docs)]

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

pub mod config;
mod session;
pub mod tools;

pub use session::{Session, SessionBuilder};

/// Re-exports of [`parley_core`] crate.
pub mod core {
    pub use parley_core::*;
}

/// The built-in system prompt with `{{TODAY}}` still to be filled in.
pub const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("./system_prompt.md");

/// Returns the built-in system prompt for the given date.
pub fn system_prompt(today: chrono::NaiveDate) -> String {
    let today = today.format("%A, %B %-d, %Y").to_string();
    SYSTEM_PROMPT_TEMPLATE.replace("{{TODAY}}", &today)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn test_system_prompt() {
        let today = NaiveDate::from_ymd_opt(2025, 10, 30).unwrap();
        let prompt = system_prompt(today);
        assert!(prompt.contains("Today is Thursday, October 30, 2025."));
        assert!(!prompt.contains("{{TODAY}}"));
    }
}
