use crate::cmd::Context;
use crate::output;
use crate::prompt;
use anyhow::Context as _;
use wpfleet_core::deployment::Deployment;
use wpfleet_core::provision;

pub fn run(ctx: &Context) -> anyhow::Result<()> {
    let dep = Deployment::locate(&ctx.root, &ctx.env)?;
    if !dep.dir.exists() {
        output::info(&format!("Deployment '{}' does not exist; nothing to clean.", ctx.env));
        return Ok(());
    }
    let question = format!(
        "Destroy deployment '{}' at {}, including databases and volumes?",
        ctx.env,
        dep.dir.display()
    );
    if !prompt::confirm_typed(&question, ctx.yes)? {
        output::info("Aborted; nothing changed.");
        return Ok(());
    }
    provision::clean(&dep, ctx.exec)
        .with_context(|| format!("failed to clean deployment '{}'", ctx.env))?;
    output::ok(&format!("deployment '{}' removed", ctx.env));
    Ok(())
}
