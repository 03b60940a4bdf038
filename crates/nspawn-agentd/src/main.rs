mod config;

use std::sync::Arc;

use anyhow::Context;
use nspawn_api::{DriverApiAdapter, HttpApi};
use nspawn_core::{
    Collaborators, Driver,
    image::NixCli,
    machine::SystemBus,
    netfilter::Iptables,
    oom::{JournalTail, OomListener},
};
use nspawn_exec::LocalSessionFactory;
use nspawn_observe::{logger_init, spawn_event_journal};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AgentConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AgentConfig::load(std::env::args().nth(1))?;
    logger_init(&cfg.logger)?;

    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    info!(%host, listen = %cfg.listen, "nspawn-agentd starting");

    let cancel = CancellationToken::new();
    let (oom, oom_task) = OomListener::spawn(cancel.child_token());
    if cfg.oom_journal {
        tokio::spawn(JournalTail::new().run(oom.clone(), cancel.child_token()));
    } else {
        warn!("OOM journal disabled, kills will be reported as plain exits");
    }

    let driver = Driver::new(
        cfg.settings.clone(),
        cfg.driver,
        Collaborators {
            sessions: Arc::new(LocalSessionFactory::new()),
            build_tool: Arc::new(NixCli::new()),
            bus: Arc::new(SystemBus::new()),
            firewall: Arc::new(Iptables::new()),
            oom,
        },
    );
    let journal = spawn_event_journal(driver.task_events(), cancel.child_token());

    let listener = tokio::net::TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("binding {}", cfg.listen))?;
    let api = HttpApi::new(Arc::new(DriverApiAdapter::new(driver.clone())));
    let server = tokio::spawn(api.serve(listener, cancel.child_token()));

    wait_for_signal().await?;
    info!("shutting down; running containers are left alone");

    driver.shutdown();
    cancel.cancel();
    server.await.context("api server panicked")??;
    let _ = tokio::join!(oom_task, journal);
    Ok(())
}

async fn wait_for_signal() -> anyhow::Result<()> {
    let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("waiting for SIGINT")?,
        _ = term.recv() => {}
    }
    Ok(())
}
