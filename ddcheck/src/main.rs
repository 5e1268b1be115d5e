use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ddcheck::cli::{Cli, Command, execute_book_command, subscribe_reply};
use ddcheck::clock::{Clock, SystemClock};
use ddcheck::config::AppConfig;
use ddcheck::domain::SubscriptionBook;
use ddcheck::llm::{LlmClient, Translator};
use ddcheck::notification::{MessageSender, OneBotSender};
use ddcheck::report::{BilibiliUserApi, ReportService, VtbDirectory};
use ddcheck::scheduler::{
    BoundedPolicy, Scheduler, TimerRegistry, supervise_bounded, supervise_forever, when_live,
};
use ddcheck::tweets::{GraphqlTweetSource, TweetWatcher, broadcast_stop_notice};
use ddcheck::{logging, panic_hook};
use live_probe::{
    BilibiliProbe, FixedRetry, LiveProbe, ProbeRouter, RetryingProbe, YoutubeProbe,
    create_client_builder, probe_with_timeout,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let (logging_config, _guard) = logging::init_logging(&config.log_dir, cli.log_filter.as_deref())
        .context("failed to initialize logging")?;
    panic_hook::install(logging_config.log_dir());

    let book = Arc::new(
        SubscriptionBook::open(&config.data_dir)
            .with_context(|| format!("failed to open data dir {}", config.data_dir.display()))?,
    );

    match cli.command() {
        Command::Run => {
            let shutdown = CancellationToken::new();
            logging_config.start_retention_cleanup(shutdown.child_token());
            run_service(config, book, shutdown).await
        }
        Command::Subscribe {
            platform,
            nickname,
            id,
            group,
        } => {
            let channel = platform.channel(id)?;
            let outcome = book.subscribe(channel.clone(), nickname.as_str(), *group)?;
            info!(%channel, group, ?outcome, "Subscription updated");
            let probe = build_probe(&config)?;
            let live = match probe_with_timeout(
                probe.as_ref(),
                &channel,
                config.scheduler.probe_timeout(),
            )
            .await
            {
                Ok(live) => live,
                Err(e) => {
                    warn!(%channel, error = %e, "Probe after subscribe failed");
                    None
                }
            };
            println!(
                "{}",
                subscribe_reply(outcome, nickname, live.as_ref(), SystemClock.now())
            );
            Ok(())
        }
        Command::WhenLive => {
            let probe = build_probe(&config)?;
            let reply = when_live(
                &book.snapshot(),
                probe.as_ref(),
                &SystemClock,
                config.scheduler.probe_timeout(),
            )
            .await;
            println!("{reply}");
            Ok(())
        }
        Command::Check { query } => {
            let service = build_report_service(&config, book.clone())?;
            println!("{}", service.check(query).await);
            Ok(())
        }
        command => {
            if let Some(reply) = execute_book_command(&book, command)? {
                println!("{reply}");
            }
            Ok(())
        }
    }
}

/// `scheduler.probe_timeout_secs` caps each attempt; callers' outer deadline
/// stretches to cover the whole retry run.
fn build_probe(config: &AppConfig) -> anyhow::Result<Arc<dyn LiveProbe>> {
    let client =
        create_client_builder(Duration::from_secs(config.bilibili.request_timeout_secs)).build()?;
    let attempt_timeout = config.scheduler.probe_timeout();
    let bilibili = RetryingProbe::new(
        BilibiliProbe::new(client, Some(config.bilibili.cookie.clone())),
        FixedRetry::new(
            config.bilibili.attempts,
            Duration::from_secs(config.bilibili.retry_delay_secs),
        ),
    )
    .with_attempt_timeout(attempt_timeout);
    let youtube = RetryingProbe::new(
        YoutubeProbe::new(config.youtube.ytdlp_path.clone(), config.youtube.playlist_end),
        FixedRetry::new(
            config.youtube.attempts,
            Duration::from_secs(config.youtube.retry_delay_secs),
        ),
    )
    .with_attempt_timeout(attempt_timeout);
    Ok(Arc::new(ProbeRouter::new(Arc::new(bilibili), Arc::new(youtube))))
}

fn build_directory(config: &AppConfig) -> anyhow::Result<Arc<VtbDirectory>> {
    let client =
        create_client_builder(Duration::from_secs(config.report.request_timeout_secs)).build()?;
    Ok(Arc::new(VtbDirectory::new(
        client,
        &config.data_dir,
        config.report.vtb_mirrors.clone(),
    )))
}

fn build_report_service(
    config: &AppConfig,
    book: Arc<SubscriptionBook>,
) -> anyhow::Result<ReportService> {
    let client =
        create_client_builder(Duration::from_secs(config.bilibili.request_timeout_secs)).build()?;
    let users = Arc::new(BilibiliUserApi::new(
        client,
        Some(config.bilibili.cookie.clone()),
    ));
    Ok(ReportService::new(book, users, build_directory(config)?))
}

async fn run_service(
    config: AppConfig,
    book: Arc<SubscriptionBook>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let sender: Arc<dyn MessageSender> = Arc::new(OneBotSender::new(&config.onebot)?);
    let registry = TimerRegistry::new(shutdown.clone());
    let scheduler = Arc::new(Scheduler::new(
        book.clone(),
        build_probe(&config)?,
        sender.clone(),
        Arc::new(SystemClock),
        registry,
        &config.scheduler,
    ));

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let cooldown = config.scheduler.restart_cooldown();
    let cancel = shutdown.child_token();
    tasks.push(tokio::spawn(async move {
        supervise_forever("live-scheduler", cooldown, cancel.clone(), || {
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        })
        .await;
    }));

    if config.tweets.enabled {
        tasks.push(spawn_tweet_relay(&config, book, sender, shutdown.child_token())?);
    }

    let directory = build_directory(&config)?;
    let refresh_interval = config.report.refresh_interval();
    let cancel = shutdown.child_token();
    tasks.push(tokio::spawn(async move {
        directory.run_refresh(refresh_interval, cancel).await;
    }));

    info!("ddcheck started");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    shutdown.cancel();

    for result in join_all(tasks).await {
        if let Err(e) = result {
            error!(error = %e, "Background task ended abnormally");
        }
    }
    info!("ddcheck stopped");
    Ok(())
}

fn spawn_tweet_relay(
    config: &AppConfig,
    book: Arc<SubscriptionBook>,
    sender: Arc<dyn MessageSender>,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let client = create_client_builder(Duration::from_secs(30)).build()?;
    let source = Arc::new(GraphqlTweetSource::new(client.clone(), &config.tweets)?);
    let translator = config.llm.is_enabled().then(|| {
        Arc::new(LlmClient::new(client, config.llm.clone())) as Arc<dyn Translator>
    });
    let watcher = Arc::new(TweetWatcher::new(
        source,
        book.clone(),
        sender.clone(),
        translator,
        config.tweets.screen_name.clone(),
        config.tweets.poll_interval(),
    ));
    let policy = BoundedPolicy {
        max_failures: config.tweets.max_failures,
        failure_window: config.tweets.failure_window(),
        cooldown: config.scheduler.restart_cooldown(),
    };

    Ok(tokio::spawn(async move {
        let result = supervise_bounded(
            "tweet-relay",
            policy,
            cancel.clone(),
            |progress| {
                let watcher = watcher.clone();
                let cancel = cancel.clone();
                async move { watcher.run(cancel, progress).await }
            },
            |reason| async move {
                broadcast_stop_notice(&book, sender.as_ref(), &reason).await;
            },
        )
        .await;
        if let Err(e) = result {
            error!(error = %e, "Tweet relay stopped");
        }
    }))
}
