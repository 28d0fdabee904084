use playlist_sync_engine::clients::{
    AcoustIdClient, JellyfinClient, MediaServer, NavidromeClient, PlexClient, SlskdClient,
    SpotifyCatalog, StaticToken, StreamingCatalog,
};
use playlist_sync_engine::config::{AppConfig, ConfigStore};
use playlist_sync_engine::context::AppContext;
use playlist_sync_engine::error::{AppError, Result};
use playlist_sync_engine::recovery::with_graceful_degradation;
use playlist_sync_engine::services::{
    AcquisitionConfig, AcquisitionSupervisor, AnalysisPool, CancelFlag, CandidateVerifier,
    ExternalIdResolver, FingerprintVerifier, PlaylistSyncService, QualityPreference,
    ScanCoordinator,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

async fn build_media_server(settings: &ConfigStore) -> Result<Arc<dyn MediaServer>> {
    let active = settings.active_media_server().await;
    let server: Arc<dyn MediaServer> = match active.as_str() {
        "jellyfin" => Arc::new(JellyfinClient::new(
            settings.get_str("jellyfin.base_url", "").await,
            settings.get_str("jellyfin.api_key", "").await,
        )?),
        "navidrome" => Arc::new(NavidromeClient::new(
            settings.get_str("navidrome.base_url", "").await,
            settings.get_str("navidrome.username", "").await,
            settings.get_str("navidrome.password", "").await,
        )?),
        _ => Arc::new(PlexClient::new(
            settings.get_str("plex.base_url", "").await,
            settings.get_str("plex.token", "").await,
        )?),
    };

    if !server.is_connected().await {
        return Err(AppError::ServiceUnavailable {
            service: format!("{} media server", active),
        });
    }
    Ok(server)
}

async fn run() -> Result<()> {
    let config = AppConfig::from_env().map_err(|e| AppError::ConfigError {
        message: e.to_string(),
    })?;
    let context = AppContext::initialize(config).await?;

    let playlist_id = std::env::args().nth(1);
    let Some(playlist_id) = playlist_id else {
        // No playlist requested: report configuration health and exit.
        let report = context.settings.validate().await;
        for (section, configured) in &report {
            info!(section = %section, configured = configured, "Config section");
        }
        let wishlist_entries = with_graceful_degradation(
            || context.wishlist.count(),
            0,
            "wishlist_count",
        )
        .await;
        info!(wishlist_entries, "Nothing to sync; pass a playlist id");
        return Ok(());
    };

    let media_server = build_media_server(&context.settings).await?;

    let daemon = Arc::new(SlskdClient::new(
        context
            .settings
            .get_str("soulseek.slskd_url", "http://localhost:5030")
            .await,
        context.settings.get_str("soulseek.api_key", "").await,
    )?);

    let spotify_token =
        std::env::var("SPOTIFY_ACCESS_TOKEN").map_err(|_| AppError::ConfigError {
            message: "SPOTIFY_ACCESS_TOKEN is required to fetch playlists".to_string(),
        })?;
    let catalog: Arc<dyn StreamingCatalog> =
        Arc::new(SpotifyCatalog::new(Arc::new(StaticToken(spotify_token)))?);

    let acoustid_enabled = context.settings.get_bool("acoustid.enabled", false).await;
    let acoustid_key = context.settings.get_str("acoustid.api_key", "").await;
    let fingerprint = if acoustid_key.is_empty() {
        FingerprintVerifier::disabled()
    } else {
        FingerprintVerifier::new(
            Some(AcoustIdClient::new(
                acoustid_key,
                context.config.bin_dir.clone(),
            )?),
            acoustid_enabled,
        )
    };

    let quality = QualityPreference::parse(
        &context
            .settings
            .get_str("soulseek.quality_preference", "flac")
            .await,
    );

    let scan = Arc::new(ScanCoordinator::new(media_server.clone()));
    let mut acquisition_config = AcquisitionConfig::new(context.config.download_root.clone());
    acquisition_config.max_concurrent = context.config.max_concurrent_downloads;

    let supervisor = Arc::new(
        AcquisitionSupervisor::new(
            daemon,
            CandidateVerifier::new(quality),
            Arc::new(fingerprint),
            context.bus.clone(),
            acquisition_config,
        )
        .with_wishlist(context.wishlist.clone())
        .with_scan_coordinator(scan.clone()),
    );

    let resolver = Arc::new(
        ExternalIdResolver::new(catalog.clone()).with_workers(context.config.resolver_workers),
    );

    let sync_service = PlaylistSyncService::new(
        media_server,
        AnalysisPool::new(context.config.analysis_workers),
        supervisor,
        context.sync_status.clone(),
    )
    .with_resolver(resolver);

    let playlist = catalog.get_playlist(&playlist_id).await?;
    info!(playlist = %playlist.name, tracks = playlist.tracks.len(), "Syncing playlist");

    let cancel = CancelFlag::new();
    let report = sync_service
        .sync_playlist(&playlist, &context.bus, cancel)
        .await?;

    info!(
        total = report.total_tracks,
        owned = report.already_owned,
        missing = report.missing,
        completed = report.summary.completed,
        failed = report.summary.failed,
        cancelled = report.summary.cancelled,
        "Sync complete"
    );
    scan.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "{}", e.user_message());
        std::process::exit(1);
    }
}
