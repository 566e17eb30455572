//! UI-facing commands.
//!
//! `Reelbox` owns every component and exposes one method per user action.
//! Commands return the inline message shown to the user on failure; the
//! same failure is also logged and emitted as an error event.

use camera_capture::CaptureDevice;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use log::{error, info, warn};

use crate::account::{
    AccountService, AuthFlow, LocalAccountService, Profile, RemoteAccountService,
};
use crate::capture::{CaptureSession, CapturedClip, Countdown};
use crate::config::{AccountBackend, AppConfig};
use crate::encoding::{Finalizer, MediaDecoder};
use crate::error::AppError;
use crate::events::{ClipSavedEvent, EventBus};
use crate::gallery::{GalleryCard, GalleryStore, VideoRecord};
use crate::player::{PlaybackController, PlaybackSurface, PlayerState};
use crate::state::{AppState, AuthView, View};
use crate::storage::{BlobStore, FileBlobStore};

pub struct Reelbox {
    config: AppConfig,
    state: Arc<AppState>,
    events: EventBus,
    device: Arc<dyn CaptureDevice>,
    finalizer: Finalizer,
    gallery: Mutex<GalleryStore>,
    capture: Arc<tokio::sync::Mutex<Option<CaptureSession>>>,
    // Stopped clip waiting for save or discard
    pending: Arc<Mutex<Option<CapturedClip>>>,
    // Once-per-second countdown of the running recording
    countdown: Mutex<Option<JoinHandle<()>>>,
    player: Mutex<Option<PlaybackController>>,
    auth: AuthFlow,
    session_watch: Option<JoinHandle<()>>,
}

/// Create the data folder, load the gallery and connect the account backend
pub async fn bootstrap(
    config: AppConfig,
    device: Arc<dyn CaptureDevice>,
    decoder: Arc<dyn MediaDecoder>,
) -> Result<Reelbox, AppError> {
    info!("📁 Data folder: {:?}", config.data_dir);
    let store: Arc<dyn BlobStore> = Arc::new(FileBlobStore::new(&config.data_dir)?);

    let mut reelbox = Reelbox::new(config, store, device, decoder)?;
    reelbox.restore_session().await;
    reelbox.watch_sessions();
    Ok(reelbox)
}

impl Reelbox {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn BlobStore>,
        device: Arc<dyn CaptureDevice>,
        decoder: Arc<dyn MediaDecoder>,
    ) -> Result<Self, AppError> {
        let gallery = GalleryStore::load(store.clone())?;

        let service: Arc<dyn AccountService> = match config.account.backend {
            AccountBackend::Local => Arc::new(LocalAccountService::new()),
            AccountBackend::Remote => Arc::new(RemoteAccountService::new(&config.account, Some(store))?),
        };
        info!("👤 Account backend: {:?}", config.account.backend);

        Ok(Self {
            state: Arc::new(AppState::new(gallery.len() as u32)),
            events: EventBus::new(),
            finalizer: Finalizer::new(decoder, config.thumbnail.clone()),
            gallery: Mutex::new(gallery),
            capture: Arc::new(tokio::sync::Mutex::new(None)),
            pending: Arc::new(Mutex::new(None)),
            countdown: Mutex::new(None),
            player: Mutex::new(None),
            auth: AuthFlow::new(service),
            session_watch: None,
            device,
            config,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn view(&self) -> View {
        self.state.view()
    }

    pub fn auth_view(&self) -> AuthView {
        self.state.auth()
    }

    pub fn clip_count(&self) -> u32 {
        *lock(&self.state.clip_count)
    }

    /// Follow session changes made by the backend (expiry, sign-out elsewhere)
    fn watch_sessions(&mut self) {
        let mut rx = self.auth.service().subscribe();
        let state = self.state.clone();
        let events = self.events.clone();

        self.session_watch = Some(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let session = rx.borrow_and_update().clone();
                let signed_in = session.is_some();
                state.apply_session(session);
                events.emit_session_changed(signed_in);
            }
        }));
    }

    async fn restore_session(&self) {
        match self.auth.service().current_session().await {
            Ok(Some(session)) => {
                info!("👤 Restored session for {}", session.user.email);
                self.state.apply_session(Some(session));
            }
            Ok(None) => {}
            Err(e) => warn!("⚠️  Could not restore session: {}", e),
        }
    }

    fn report<T>(&self, command: &str, result: Result<T, AppError>) -> Result<T, String> {
        result.map_err(|e| {
            error!("❌ {} failed: {}", command, e);
            let message = e.user_message();
            self.events.emit_error(e.code(), &message);
            message
        })
    }

    fn go_to(&self, next: View) -> Result<(), AppError> {
        self.state.transition(next.clone())?;
        info!("🧭 View: {}", next.name());
        self.events.emit_view_changed(next);
        Ok(())
    }

    // ----- gallery -----

    /// Leave whatever view is active and show the gallery
    pub async fn open_gallery(&self) -> Result<Vec<GalleryCard>, String> {
        self.release_capture().await;
        self.release_player();
        self.report("open_gallery", self.go_to(View::Gallery))?;
        Ok(self.gallery_cards())
    }

    pub fn gallery_cards(&self) -> Vec<GalleryCard> {
        lock(&self.gallery).cards()
    }

    pub fn video(&self, id: &str) -> Option<VideoRecord> {
        lock(&self.gallery).get(id).cloned()
    }

    pub fn videos(&self) -> Vec<VideoRecord> {
        lock(&self.gallery).all().to_vec()
    }

    // ----- recorder -----

    /// Show the recorder and acquire the camera. On denial the recorder view
    /// stays up so the user can try again.
    pub async fn open_recorder(&self) -> Result<Countdown, String> {
        self.release_player();
        self.report("open_recorder", self.go_to(View::Recorder))?;

        let mut capture = self.capture.lock().await;
        if let Some(session) = capture.as_ref().filter(|s| s.is_open()) {
            return Ok(session.countdown());
        }

        let settings = &self.config.recording;
        let opened = CaptureSession::open(self.device.clone(), settings.constraints())
            .await
            .map(|session| {
                session
                    .with_recorder_options(settings.recorder_options())
                    .with_max_seconds(settings.max_seconds)
            });
        let session = self.report("open_recorder", opened)?;

        let countdown = session.countdown();
        *capture = Some(session);
        Ok(countdown)
    }

    /// Start recording. The countdown then runs on its own and stops the
    /// recording at the ceiling.
    pub async fn start_recording(&self) -> Result<bool, String> {
        let mut capture = self.capture.lock().await;
        let Some(session) = capture.as_mut() else {
            warn!("⚠️  No camera open, ignoring start");
            return Ok(false);
        };

        let started = self.report("start_recording", session.start_recording())?;
        if started {
            lock(&self.pending).take();
            *lock(&self.state.is_recording) = true;
            self.events.emit_status("recording");
            let countdown = session.countdown();
            self.events.emit_countdown(countdown.elapsed, countdown.max);
            self.spawn_countdown();
        }
        Ok(started)
    }

    /// Progress of the current recording
    pub async fn countdown(&self) -> Result<Countdown, String> {
        let capture = self.capture.lock().await;
        match capture.as_ref() {
            Some(session) => Ok(session.countdown()),
            None => self.report("countdown", Err(not_open())),
        }
    }

    /// Stop recording; returns the elapsed seconds of the held clip, or
    /// `None` when nothing was recording
    pub async fn stop_recording(&self) -> Result<Option<f64>, String> {
        let mut capture = self.capture.lock().await;
        // Holding the session lock, so the countdown is between ticks
        self.cancel_countdown();
        let Some(session) = capture.as_mut() else {
            return Ok(None);
        };

        Ok(session.stop_recording().await.map(|clip| {
            let elapsed = clip.elapsed_seconds;
            hold_clip(&self.state, &self.events, &self.pending, clip);
            elapsed
        }))
    }

    fn spawn_countdown(&self) {
        let capture = self.capture.clone();
        let pending = self.pending.clone();
        let state = self.state.clone();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let mut capture = capture.lock().await;
                let Some(session) = capture.as_mut().filter(|s| s.is_recording()) else {
                    break;
                };

                let finished = session.tick().await;
                let countdown = session.countdown();
                events.emit_countdown(countdown.elapsed, countdown.max);
                if let Some(clip) = finished {
                    hold_clip(&state, &events, &pending, clip);
                    break;
                }
            }
        });

        if let Some(previous) = lock(&self.countdown).replace(handle) {
            previous.abort();
        }
    }

    /// Only call with the capture lock held
    fn cancel_countdown(&self) {
        if let Some(handle) = lock(&self.countdown).take() {
            handle.abort();
        }
    }

    // ----- saving -----

    /// Finalize the held clip with a thumbnail and add it to the gallery
    pub async fn save_recording(&self) -> Result<VideoRecord, String> {
        let result = async {
            let clip = self.take_pending()?;
            let record = self.finalizer.finalize(clip).await?;
            self.store_record(record).await
        }
        .await;
        self.report("save_recording", result)
    }

    /// Accept the held clip without a thumbnail
    pub async fn save_recording_without_thumbnail(&self) -> Result<VideoRecord, String> {
        let result = async {
            let clip = self.take_pending()?;
            let record = self.finalizer.finalize_without_thumbnail(clip).await?;
            self.store_record(record).await
        }
        .await;
        self.report("save_recording_without_thumbnail", result)
    }

    /// Drop the held clip and stay in the recorder
    pub fn discard_recording(&self) -> bool {
        let discarded = lock(&self.pending).take().is_some();
        if discarded {
            info!("🗑️  Discarded recording");
        }
        discarded
    }

    fn take_pending(&self) -> Result<CapturedClip, AppError> {
        lock(&self.pending)
            .take()
            .ok_or_else(|| AppError::EncodingFailure("nothing has been recorded".to_string()))
    }

    async fn store_record(&self, mut record: VideoRecord) -> Result<VideoRecord, AppError> {
        {
            let mut gallery = lock(&self.gallery);
            // Two saves within the same millisecond would share an id
            while gallery.get(&record.id).is_some() {
                record.created_at += 1;
                record.id = record.created_at.to_string();
            }
            gallery.append(record.clone())?;
        }

        *lock(&self.state.clip_count) += 1;
        self.events.emit_clip_saved(ClipSavedEvent {
            id: record.id.clone(),
            duration_ms: (record.duration_seconds * 1000.0).round() as u64,
        });
        info!("💾 Saved clip {} ({:.1}s)", record.id, record.duration_seconds);

        self.release_capture().await;
        self.go_to(View::Gallery)?;
        Ok(record)
    }

    async fn release_capture(&self) {
        let mut capture = self.capture.lock().await;
        self.cancel_countdown();
        if let Some(mut session) = capture.take() {
            session.close();
        }
        drop(capture);
        lock(&self.pending).take();
        let mut recording = lock(&self.state.is_recording);
        if *recording {
            *recording = false;
            self.events.emit_status("idle");
        }
    }

    // ----- player -----

    /// Open a gallery record on the given surface
    pub fn play_video(&self, record_id: &str, surface: Box<dyn PlaybackSurface>) -> Result<PlayerState, String> {
        let result = (|| {
            let record = self
                .video(record_id)
                .ok_or_else(|| AppError::NotFound(format!("video {}", record_id)))?;

            let next = View::Player {
                record_id: record.id.clone(),
            };
            if !self.view().can_transition_to(&next) {
                return Err(AppError::InvalidTransition {
                    from: self.view().name().to_string(),
                    to: next.name().to_string(),
                });
            }

            let hide_after = Duration::from_millis(self.config.player.controls_hide_ms);
            let player = PlaybackController::open(surface, &record, hide_after, Instant::now())?;
            let state = player.state();
            *lock(&self.player) = Some(player);
            self.go_to(next)?;
            Ok(state)
        })();
        self.report("play_video", result)
    }

    fn with_player(
        &self,
        command: &str,
        f: impl FnOnce(&mut PlaybackController) -> PlayerState,
    ) -> Result<PlayerState, String> {
        let mut player = lock(&self.player);
        let result = player
            .as_mut()
            .map(f)
            .ok_or_else(|| AppError::NotFound("nothing is playing".to_string()));
        self.report(command, result)
    }

    pub fn player_toggle_play(&self) -> Result<PlayerState, String> {
        self.with_player("player_toggle_play", |p| p.toggle_play(Instant::now()))
    }

    pub fn player_toggle_mute(&self) -> Result<PlayerState, String> {
        self.with_player("player_toggle_mute", |p| p.toggle_mute(Instant::now()))
    }

    pub fn player_tap(&self) -> Result<PlayerState, String> {
        self.with_player("player_tap", |p| p.tap(Instant::now()))
    }

    /// Called by the UI timer; hides idle controls
    pub fn player_poll(&self) -> Result<PlayerState, String> {
        self.with_player("player_poll", |p| p.poll(Instant::now()))
    }

    /// Release the media and return to the gallery
    pub fn close_player(&self) -> Result<Vec<GalleryCard>, String> {
        self.release_player();
        self.report("close_player", self.go_to(View::Gallery))?;
        Ok(self.gallery_cards())
    }

    fn release_player(&self) {
        if let Some(player) = lock(&self.player).take() {
            let id = player.close();
            info!("⏹️  Closed player for {}", id);
        }
    }

    // ----- accounts -----

    pub async fn sign_up(&self, email: &str, password: &str, nickname: &str) -> Result<Profile, String> {
        let result = self.auth.sign_up(email, password, nickname).await;
        let (_, profile) = self.report("sign_up", result)?;

        // Backends that sign in on registration hand back a session right away
        if let Ok(Some(session)) = self.auth.service().current_session().await {
            self.state.apply_session(Some(session));
            let _ = self.state.set_profile(profile.clone());
        }
        Ok(profile)
    }

    /// Sign in. The profile is `None` when it could not be loaded; that
    /// failure is reported as an error event while the user stays signed in.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Option<Profile>, String> {
        let result = self.auth.sign_in(email, password).await;
        let (session, profile) = self.report("sign_in", result)?;

        self.state.apply_session(Some(session));
        match profile {
            Ok(profile) => {
                let _ = self.state.set_profile(profile.clone());
                Ok(Some(profile))
            }
            Err(e) => {
                let _ = self.report::<()>("load_profile", Err(e));
                Ok(None)
            }
        }
    }

    pub async fn sign_out(&self) -> Result<(), String> {
        let result = self.auth.sign_out().await;
        self.state.apply_session(None);
        self.report("sign_out", result)
    }

    pub async fn load_profile(&self) -> Result<Profile, String> {
        match self.auth.load_profile().await {
            Ok((session, profile)) => {
                self.state.apply_session(Some(session));
                let _ = self.state.set_profile(profile.clone());
                Ok(profile)
            }
            Err(e) => {
                if e == AppError::NoActiveSession {
                    self.state.apply_session(None);
                }
                self.report("load_profile", Err(e))
            }
        }
    }

    pub async fn update_nickname(&self, nickname: &str) -> Result<Profile, String> {
        let result = async {
            let current = match self.state.auth().profile().cloned() {
                Some(profile) => profile,
                None => self.auth.load_profile().await?.1,
            };
            let updated = self.auth.update_nickname(&current, nickname).await?;
            self.state.set_profile(updated.clone())?;
            Ok::<_, AppError>(updated)
        }
        .await;
        self.report("update_nickname", result)
    }
}

impl Drop for Reelbox {
    fn drop(&mut self) {
        if let Some(handle) = self.session_watch.take() {
            handle.abort();
        }
        if let Some(handle) = lock(&self.countdown).take() {
            handle.abort();
        }
    }
}

fn hold_clip(state: &AppState, events: &EventBus, pending: &Mutex<Option<CapturedClip>>, clip: CapturedClip) {
    *lock(&state.is_recording) = false;
    events.emit_status("idle");
    *lock(pending) = Some(clip);
}

fn not_open() -> AppError {
    AppError::NotFound("no camera session is open".to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
