use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ftb_core::{
    config::Config,
    dispatch::DispatchPipeline,
    fetcher::PostFetcher,
    ledger::DeliveryLedger,
    poller::PollScheduler,
    ports::{ForumClient, MessagingPort},
    session::ForumSession,
};
use ftb_forum::DiscuzClient;
use ftb_telegram::{router::AppState, TelegramMessenger};

#[tokio::main]
async fn main() -> Result<(), ftb_core::Error> {
    ftb_core::logging::init("ftb")?;

    let cfg = Arc::new(Config::load()?);

    let forum: Arc<dyn ForumClient> = Arc::new(DiscuzClient::new(
        &cfg.forum_base_url,
        &cfg.forum_username,
        &cfg.forum_password,
    )?);

    let bot = ftb_telegram::bot_from_config(&cfg);
    let messenger: Arc<dyn MessagingPort> =
        Arc::new(TelegramMessenger::new(bot.clone(), &cfg));

    let ledger = Arc::new(DeliveryLedger::open(&cfg.ledger_file)?);
    let session = Arc::new(ForumSession::new(cfg.clone(), forum.clone(), messenger.clone()));

    match session.restore_persisted().await {
        Ok(true) => tracing::info!("previous forum session restored"),
        Ok(false) => tracing::info!("no previous forum session to restore"),
        Err(e) => tracing::warn!("could not restore previous forum session: {e}"),
    }

    let fetcher = Arc::new(PostFetcher::new(
        session.clone(),
        forum,
        cfg.max_posts_per_check,
    ));
    let dispatch = Arc::new(DispatchPipeline::new(
        ledger.clone(),
        messenger.clone(),
        cfg.send_spacing,
    ));

    let cancel = CancellationToken::new();
    let scheduler = Arc::new(PollScheduler::new(
        cfg.clone(),
        fetcher,
        dispatch,
        cancel.clone(),
    ));

    let _ = messenger
        .send_operator_message("Forum relay bot started.")
        .await;

    // The poll loop and the Telegram dispatcher run side by side: the first
    // cycle's login may suspend on a captcha that only the dispatcher can
    // resolve.
    let poll_task = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    let state = Arc::new(AppState {
        cfg,
        session,
        ledger,
        scheduler,
    });
    let dispatcher_task = tokio::spawn(async move {
        if let Err(e) = ftb_telegram::router::run_dispatcher(bot, state).await {
            tracing::error!("telegram dispatcher failed: {e}");
        }
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    cancel.cancel();
    let _ = poll_task.await;
    let _ = messenger
        .send_operator_message("Forum relay bot stopped.")
        .await;
    dispatcher_task.abort();

    Ok(())
}

/// Resolves on SIGINT or (on unix) SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("could not listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("could not listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
