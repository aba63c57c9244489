use crate::cmd::Context;
use crate::output::{self, print_json};
use crate::prompt;
use anyhow::Context as _;
use wpfleet_core::deployment::Deployment;
use wpfleet_core::provision::{self, RemoveOptions};

pub fn run(
    ctx: &Context,
    domain: Option<&str>,
    all: bool,
    drop_database: bool,
) -> anyhow::Result<()> {
    let mut dep = Deployment::open(&ctx.root, &ctx.env)?;
    let opts = RemoveOptions { drop_database };

    let removed = if all {
        if dep.registry.is_empty() {
            output::info("No sites to remove.");
            return Ok(());
        }
        let question = format!(
            "Remove all {} sites from deployment '{}'?",
            dep.registry.len(),
            ctx.env
        );
        if !prompt::confirm_typed(&question, ctx.yes)? {
            output::info("Aborted; nothing changed.");
            return Ok(());
        }
        provision::remove_all(&mut dep, ctx.exec, opts).context("failed to remove sites")?
    } else {
        let domain = domain.context("a domain or --all is required")?;
        let site = provision::remove(&mut dep, ctx.exec, domain, opts)
            .with_context(|| format!("failed to remove {}", domain.trim()))?;
        vec![site]
    };

    if ctx.json {
        return print_json(&removed);
    }
    for site in &removed {
        output::ok(&format!("{} removed", site.domain));
    }
    Ok(())
}
