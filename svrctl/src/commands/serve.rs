use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use svr_core::{
    ChannelRegistry, EventHub, JobProcessor, MediaPipeline, ResolverProbe, StreamSupervisor,
    SvrConfig, ThumbnailSupervisor,
};

use crate::Result;

use super::{open_jobs, open_library};

pub fn run(config: &SvrConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    std::fs::create_dir_all(config.recordings_dir())?;
    std::fs::create_dir_all(config.data_dir())?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(config))
}

async fn serve(config: &SvrConfig) -> Result<()> {
    let library = open_library(config)?;
    let jobs = open_jobs(config)?;
    let registry = Arc::new(ChannelRegistry::new());
    let events = EventHub::default();
    let pipeline = MediaPipeline::new(
        &config.pipeline.ffmpeg_path,
        &config.pipeline.ffprobe_path,
    );
    let probe = Arc::new(ResolverProbe::new(
        config.capture.resolver_command.clone(),
        config.capture.resolver_args.clone(),
    ));

    let token = CancellationToken::new();

    let stream_supervisor = StreamSupervisor::new(
        library.clone(),
        jobs.clone(),
        Arc::clone(&registry),
        probe,
        pipeline.clone(),
        events.clone(),
        &config.capture,
    );
    let thumbnail_supervisor = ThumbnailSupervisor::new(
        Arc::clone(&registry),
        pipeline.clone(),
        events.clone(),
        config.recordings_dir(),
        &config.capture,
    );
    let processor = JobProcessor::new(
        library,
        jobs,
        pipeline,
        events.clone(),
        config.preview.clone(),
        Duration::from_secs(config.pipeline.poll_interval_seconds),
    );

    let stream_task = {
        let token = token.clone();
        tokio::spawn(async move { stream_supervisor.run(token).await })
    };
    let thumbnail_task = {
        let token = token.clone();
        tokio::spawn(async move { thumbnail_supervisor.run(token).await })
    };
    let processor_task = {
        let token = token.clone();
        tokio::spawn(async move { processor.run(token).await })
    };

    info!("svr serving; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    token.cancel();

    let _ = stream_task.await;
    let _ = thumbnail_task.await;
    let _ = processor_task.await;
    info!("shutdown complete");
    Ok(())
}
