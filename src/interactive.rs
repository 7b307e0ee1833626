use std::path::Path;

use console::style;
use dialoguer::{Confirm, Input};

use crate::provision::OperatorPrompt;

/// Terminal implementation of the operator escape hatches. Prompts appear
/// only when automation is exhausted; a bell rings so an unattended run gets
/// noticed.
pub struct TerminalPrompt;

impl TerminalPrompt {
    pub fn new() -> Self {
        Self
    }

    fn bell() {
        print!("\x07");
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorPrompt for TerminalPrompt {
    fn request_code(&self, address: &str) -> Option<String> {
        Self::bell();
        println!();
        println!(
            "{} No verification code arrived for {}",
            style("!").yellow(),
            style(address).cyan()
        );
        println!("  Check the inbox yourself and paste the code below.");

        let entered: String = Input::new()
            .with_prompt("Verification code (empty to skip)")
            .allow_empty(true)
            .interact_text()
            .unwrap_or_default();

        let entered = entered.trim().to_string();
        if entered.is_empty() || entered.eq_ignore_ascii_case("skip") {
            println!("{} Skipped, unit abandoned", style("✗").red());
            None
        } else {
            Some(entered)
        }
    }

    fn confirm_result_on_disk(&self, expected: &Path) -> bool {
        Self::bell();
        println!();
        println!(
            "{} Automated download failed for {}",
            style("!").yellow(),
            style(expected.display()).cyan()
        );
        println!("  Download the result manually into the output directory,");
        println!("  then confirm below. The newest new file will be renamed.");

        Confirm::new()
            .with_prompt("File downloaded?")
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}
