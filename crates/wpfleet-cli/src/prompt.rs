//! Confirmations and questions. Uses dialoguer on a terminal and plain line
//! reads from stdin otherwise, so every prompt can be scripted.

use anyhow::Context;
use dialoguer::{Confirm, Input};
use std::io::{BufRead, IsTerminal};

fn interactive() -> bool {
    std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
}

fn read_line(prompt: &str) -> anyhow::Result<String> {
    eprint!("{prompt} ");
    let mut input = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut input)
        .context("failed to read from stdin")?;
    Ok(input.trim().to_string())
}

/// Ask a free-form question. An empty answer is allowed.
pub fn ask(question: &str) -> anyhow::Result<String> {
    if interactive() {
        let answer: String = Input::new()
            .with_prompt(question)
            .allow_empty(true)
            .interact_text()
            .context("prompt failed")?;
        return Ok(answer.trim().to_string());
    }
    read_line(&format!("{question}:"))
}

/// Yes/no question defaulting to no.
pub fn confirm(question: &str, assume_yes: bool) -> anyhow::Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    if interactive() {
        return Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact()
            .context("prompt failed");
    }
    let answer = read_line(&format!("{question} [y/N]"))?.to_ascii_lowercase();
    Ok(matches!(answer.as_str(), "y" | "yes"))
}

/// Destructive confirmation: only the literal answer `yes` proceeds.
pub fn confirm_typed(question: &str, assume_yes: bool) -> anyhow::Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    let answer = ask(&format!("{question} Type 'yes' to continue"))?;
    Ok(answer == "yes")
}

/// Ask how many sites to create, then for each domain.
pub fn domains() -> anyhow::Result<Vec<String>> {
    let count = ask("How many sites?")?;
    let count: usize = if count.is_empty() {
        0
    } else {
        count
            .parse()
            .with_context(|| format!("'{count}' is not a number"))?
    };
    (1..=count)
        .map(|i| ask(&format!("Domain for site {i}")))
        .collect()
}
