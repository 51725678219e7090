use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

mod app;
mod cli;
mod config;
mod db;
mod error;
mod feed;
mod models;
mod redeem;
mod services;

use app::App;
use cli::Args;
use config::Config;
use redeem::{shutdown, Scheduler};
use services::{HttpRedeemer, Session};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // INFO by default, DEBUG with -v; RUST_LOG directives still apply
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let env = |key: &str| std::env::var(key).ok();

    let mut config = Config::load().context("Failed to load configuration")?;
    config.apply_env(env);

    let plan = match args.into_plan(&config, env) {
        Ok(plan) => plan,
        Err(e) => {
            tracing::error!("{}", e);
            return Ok(ExitCode::from(2));
        }
    };

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing the current submission");
            trigger.trigger();
        }
    });

    let redeemer = HttpRedeemer::new(
        config.redeem_url.clone(),
        Session::new(config.session_cookie.clone()),
    );
    let app = App::new(config, &plan, Box::new(redeemer), shutdown.clone())
        .await
        .context("Failed to open the redemption store")?;

    match plan.schedule {
        Some(interval) => {
            let (app, plan) = (&app, &plan);
            Scheduler::new(interval, shutdown)
                .run(move || app.run_once(plan))
                .await
                .context("Scheduled redemption stopped")?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            let summary = app.run_once(&plan).await.context("Redemption run failed")?;
            if plan.is_manual() && summary.confirmed() == 0 {
                return Ok(ExitCode::from(1));
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
