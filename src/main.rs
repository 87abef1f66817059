use std::sync::Arc;
use std::sync::atomic::Ordering;

use inbox_warden::cache::FsCacheStore;
use inbox_warden::config::EngineSettings;
use inbox_warden::detector::spawn_change_detector;
use inbox_warden::orchestrator::{OrchestratorDeps, ScanOrchestrator};
use inbox_warden::remote::http::HttpRemote;
use inbox_warden::surface::sim::{SimInbox, SimMessage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let api_base = std::env::var("WARDEN_API_BASE").unwrap_or_else(|_| {
        eprintln!("Error: WARDEN_API_BASE not set");
        eprintln!("  export WARDEN_API_BASE=https://dashboard.example.com");
        std::process::exit(1);
    });
    let token = std::env::var("WARDEN_API_TOKEN")
        .ok()
        .map(secrecy::SecretString::from);
    let user_id = std::env::var("WARDEN_USER_ID").unwrap_or_else(|_| "default".to_string());
    let data_dir =
        std::env::var("WARDEN_DATA_DIR").unwrap_or_else(|_| "./data/warden".to_string());

    let settings = EngineSettings::from_env();

    eprintln!("inbox-warden v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: {api_base}");
    eprintln!("   User: {user_id}");
    eprintln!("   Cache dir: {data_dir}");
    eprintln!(
        "   Poll every {:?}, debounce {:?}\n",
        settings.poll_interval, settings.debounce
    );

    let remote = Arc::new(HttpRemote::new(api_base, token));

    // Harness surface: a scripted in-memory inbox standing in for the
    // real host adapter, so the engine runs end to end against live
    // endpoints.
    let surface = harness_surface().await;

    let deps = OrchestratorDeps {
        surface: Arc::new(surface),
        config_store: remote.clone(),
        cache_store: Arc::new(FsCacheStore::new(&data_dir)),
        watermark_store: remote.clone(),
        classifier: remote.clone(),
        log_sink: remote.clone(),
        counter_sink: remote,
    };
    let orchestrator = ScanOrchestrator::new(&user_id, settings.clone(), deps).await;
    let _config_refresh = orchestrator.spawn_config_refresh();

    // No mutation observer in harness mode; the poll tick drives scans.
    // Hold the sender so the channel stays open.
    let (_mutation_tx, mutation_rx) = tokio::sync::mpsc::channel(64);
    let (handle, shutdown) =
        spawn_change_detector(orchestrator.clone(), mutation_rx, &settings);

    tokio::signal::ctrl_c().await?;
    eprintln!("Shutting down");
    shutdown.store(true, Ordering::Relaxed);
    handle.abort();

    Ok(())
}

async fn harness_surface() -> SimInbox {
    let now = chrono::Utc::now().timestamp() as u64;
    let inbox = SimInbox::new(6);
    inbox
        .push_message(SimMessage::new(
            "demo-1",
            "Great post, thanks for sharing!",
            "facebook",
            now.saturating_sub(120),
        ))
        .await;
    inbox
        .push_message(SimMessage::new(
            "demo-2",
            "Buy now!! Limited offer, free money at spam.example",
            "facebook",
            now.saturating_sub(90),
        ))
        .await;
    inbox
        .push_message(SimMessage::new(
            "demo-3",
            "Can you check my DM?",
            "instagram",
            now.saturating_sub(60),
        ))
        .await;
    inbox
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    match std::env::var("WARDEN_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "warden.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(false)
                .init();
            None
        }
    }
}
