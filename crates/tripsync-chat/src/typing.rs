use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::session::ChatSession;

/// Local side of the typing indicator: announce on the first keystroke,
/// withdraw after a quiet period or on an explicit [`stop`](Self::stop)
/// (blur, send).
pub struct TypingDebouncer {
    session: ChatSession,
    idle: Duration,
    state: Arc<Mutex<DebounceState>>,
}

#[derive(Default)]
struct DebounceState {
    typing: bool,
    timer: Option<JoinHandle<()>>,
}

impl TypingDebouncer {
    /// Uses the session's typing timeout as the quiet period.
    pub fn new(session: ChatSession) -> Self {
        let idle = session.connection().config().typing_timeout;
        Self::with_idle(session, idle)
    }

    pub fn with_idle(session: ChatSession, idle: Duration) -> Self {
        Self {
            session,
            idle,
            state: Arc::new(Mutex::new(DebounceState::default())),
        }
    }

    pub fn is_typing(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).typing
    }

    pub fn keystroke(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !st.typing {
            st.typing = true;
            announce(&self.session, true);
        }

        if let Some(timer) = st.timer.take() {
            timer.abort();
        }
        let session = self.session.clone();
        let state = self.state.clone();
        let idle = self.idle;
        st.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let mut st = state.lock().unwrap_or_else(|e| e.into_inner());
            st.timer = None;
            if st.typing {
                st.typing = false;
                announce(&session, false);
            }
        }));
    }

    pub fn stop(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = st.timer.take() {
            timer.abort();
        }
        if st.typing {
            st.typing = false;
            announce(&self.session, false);
        }
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = st.timer.take() {
            timer.abort();
        }
    }
}

fn announce(session: &ChatSession, is_typing: bool) {
    if let Err(e) = session.send_typing_indicator(is_typing) {
        debug!("Typing indicator not sent: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripsync_db::Database;
    use tripsync_realtime::{ConnectionStatus, Hub, LocalTransport};
    use tripsync_types::auth::{CurrentUser, StaticAuth};
    use uuid::Uuid;

    use crate::session::SessionOptions;

    #[tokio::test]
    async fn quiet_period_clears_typing() {
        let session = ChatSession::open(
            Uuid::new_v4(),
            &StaticAuth::signed_in(CurrentUser::new(Uuid::new_v4(), "Ana")),
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(LocalTransport::new(Hub::new())),
            SessionOptions::default(),
        )
        .await
        .unwrap();
        let mut status = session.connection().status_changes();
        status
            .wait_for(|s| *s == ConnectionStatus::Connected)
            .await
            .unwrap();

        let debouncer = TypingDebouncer::with_idle(session.clone(), Duration::from_millis(50));
        debouncer.keystroke();
        assert!(debouncer.is_typing());
        debouncer.keystroke();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!debouncer.is_typing());

        debouncer.keystroke();
        debouncer.stop();
        assert!(!debouncer.is_typing());
        session.close();
    }
}
