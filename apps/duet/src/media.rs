use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error("local media unavailable: {0}")]
    Unavailable(String),
}

/// Capability interface to whatever captures and renders media.
///
/// `L` is the local track type attached to each new peer connection and `R` the
/// remote track type handed back when the peer starts sending; both are chosen
/// by the `PeerConnector` in use.
pub trait MediaBinding<L, R>: Send + Sync + 'static {
    /// Tracks to attach to a fresh peer connection. Called once per round.
    fn local_tracks(&self) -> Result<Vec<L>, MediaError>;

    /// A remote track arrived on the current peer connection.
    fn on_remote_track(&self, track: R);

    /// Stop rendering whatever remote media is currently attached.
    fn stop_remote(&self);
}

/// Media binding for tests: hands out string tracks and records what the
/// session delivers back.
#[derive(Debug, Clone)]
pub struct MockMedia {
    state: std::sync::Arc<parking_lot::Mutex<MockMediaState>>,
}

#[derive(Debug)]
struct MockMediaState {
    local: Result<Vec<String>, MediaError>,
    remote: Vec<String>,
    stops: usize,
}

impl MockMedia {
    pub fn with_tracks<I, S>(tracks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_result(Ok(tracks.into_iter().map(Into::into).collect()))
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::from_result(Err(MediaError::Unavailable(reason.into())))
    }

    fn from_result(local: Result<Vec<String>, MediaError>) -> Self {
        Self {
            state: std::sync::Arc::new(parking_lot::Mutex::new(MockMediaState {
                local,
                remote: Vec::new(),
                stops: 0,
            })),
        }
    }

    pub fn remote_tracks(&self) -> Vec<String> {
        self.state.lock().remote.clone()
    }

    pub fn stop_count(&self) -> usize {
        self.state.lock().stops
    }
}

impl MediaBinding<String, String> for MockMedia {
    fn local_tracks(&self) -> Result<Vec<String>, MediaError> {
        self.state.lock().local.clone()
    }

    fn on_remote_track(&self, track: String) {
        self.state.lock().remote.push(track);
    }

    fn stop_remote(&self) {
        let mut state = self.state.lock();
        state.stops += 1;
        state.remote.clear();
    }
}
