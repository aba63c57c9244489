use crate::cmd::{check_config, init::report_certificate, Context};
use crate::output::{self, print_json};
use anyhow::Context as _;
use wpfleet_core::deployment::Deployment;
use wpfleet_core::provision::{self, AddOptions};

pub fn run(ctx: &Context, domain: &str, no_certs: bool) -> anyhow::Result<()> {
    let mut dep = Deployment::open(&ctx.root, &ctx.env)?;
    check_config(&dep.config)?;

    let opts = AddOptions { certs: !no_certs };
    let report = provision::add(&mut dep, ctx.exec, domain, opts)
        .with_context(|| format!("failed to add {}", domain.trim()))?;

    if ctx.json {
        return print_json(&report);
    }
    output::ok(&format!(
        "{} added (short name {}, database {})",
        report.domain, report.short_name, report.database
    ));
    report_certificate(&report.domain, &report.certificate);
    Ok(())
}
