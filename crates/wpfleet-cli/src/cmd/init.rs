use crate::cmd::{check_config, Context};
use crate::output::{self, print_json};
use crate::prompt;
use anyhow::Context as _;
use wpfleet_core::deployment::Deployment;
use wpfleet_core::provision::{self, CertOutcome, InitOptions};

pub fn run(
    ctx: &Context,
    domains: Vec<String>,
    no_start: bool,
    no_certs: bool,
) -> anyhow::Result<()> {
    let mut dep = Deployment::locate(&ctx.root, &ctx.env)?;
    check_config(&dep.config)?;

    let reuse = dep.is_initialized();
    if reuse {
        let question = format!(
            "Deployment '{}' already exists at {}. Add to it?",
            ctx.env,
            dep.dir.display()
        );
        if !prompt::confirm(&question, ctx.yes)? {
            output::info("Nothing changed.");
            return Ok(());
        }
    }

    let domains = if domains.is_empty() {
        prompt::domains()?
    } else {
        domains
    };

    if !ctx.json {
        output::info(&format!("Initializing deployment '{}' in {}", ctx.env, dep.dir.display()));
    }
    let opts = InitOptions {
        start: !no_start,
        certs: !no_certs,
        reuse,
    };
    let report = provision::init(&mut dep, ctx.exec, &domains, opts)
        .with_context(|| format!("failed to initialize deployment '{}'", ctx.env))?;

    if ctx.json {
        return print_json(&report);
    }
    for site in &report.sites {
        output::ok(&format!("{} staged (database {})", site.domain, site.database));
        report_certificate(&site.domain, &site.certificate);
    }
    if report.started {
        output::ok("containers started");
    } else {
        output::info("containers not started; run `docker compose up -d` in the deployment directory");
    }
    Ok(())
}

pub fn report_certificate(domain: &str, outcome: &CertOutcome) {
    match outcome {
        CertOutcome::Issued | CertOutcome::Existing => {
            output::ok(&format!("{domain}: certificate {outcome}"))
        }
        CertOutcome::SelfSigned { .. } | CertOutcome::Failed { .. } => {
            output::warn(&format!("{domain}: certificate {outcome}"))
        }
    }
}
