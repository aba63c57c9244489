use crate::cmd::Context;
use crate::output::{self, print_json, print_table};
use wpfleet_core::deployment::Deployment;
use wpfleet_core::executor::SystemExecutor;
use wpfleet_core::provision;

pub fn run(ctx: &Context) -> anyhow::Result<()> {
    let dep = Deployment::locate(&ctx.root, &ctx.env)?;
    // Read-only: queries run even under --dry.
    let statuses = provision::list(&dep, &SystemExecutor);

    if ctx.json {
        return print_json(&statuses);
    }
    if statuses.is_empty() {
        println!("No sites in deployment '{}'.", ctx.env);
        return Ok(());
    }
    let rows = statuses
        .iter()
        .map(|s| {
            vec![
                s.domain.clone(),
                s.short_name.clone(),
                s.database.clone(),
                s.liveness.to_string(),
                s.certificate.to_string(),
            ]
        })
        .collect();
    print_table(&["DOMAIN", "SHORT", "DATABASE", "STATUS", "CERTIFICATE"], rows);
    for s in statuses.iter().filter(|s| s.certificate.is_expiring()) {
        output::warn(&format!(
            "certificate for {} is {}; check its renewal job",
            s.domain, s.certificate
        ));
    }
    Ok(())
}
