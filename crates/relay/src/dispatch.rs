//! Dispatch engine: one hook event in, at most one Discord message out.
//!
//! Filter → classify/format → (thread mode) resolve or create+bind → post →
//! touch. This is the only layer that decides whether a failure is fatal;
//! everything below returns typed errors.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use hookcord_protocol::{EventKind, HookEvent};

use crate::classify::{self, ClassificationError};
use crate::config::Config;
use crate::delivery::{Delivery, DeliveryError, PostTarget};
use crate::format;
use crate::thread_naming::thread_name;
use crate::thread_store::{StoreError, ThreadStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Filtered,
    ThreadResolved,
    ThreadCreated,
    Delivered,
    Failed,
}

impl DispatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchState::Filtered => "filtered",
            DispatchState::ThreadResolved => "thread_resolved",
            DispatchState::ThreadCreated => "thread_created",
            DispatchState::Delivered => "delivered",
            DispatchState::Failed => "failed",
        }
    }
}

/// How a successful dispatch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// `Filtered` or `Delivered`
    pub state: DispatchState,
    /// `ThreadResolved` or `ThreadCreated` when thread mode routed the message
    pub thread_state: Option<DispatchState>,
    pub thread_id: Option<String>,
    pub message_id: Option<String>,
}

impl DispatchReport {
    fn filtered() -> Self {
        Self {
            state: DispatchState::Filtered,
            thread_state: None,
            thread_id: None,
            message_id: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Classification(#[from] ClassificationError),
    #[error("thread store: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error("binding for session {session_id} disappeared after a bind conflict")]
    LostBinding { session_id: String },
    #[error("dispatch abandoned after {0:?}")]
    DeadlineExceeded(Duration),
}

impl DispatchError {
    /// Terminal state for every error
    pub fn state(&self) -> DispatchState {
        DispatchState::Failed
    }
}

pub struct DispatchEngine<D> {
    config: Arc<Config>,
    store: ThreadStore,
    delivery: D,
}

impl<D: Delivery> DispatchEngine<D> {
    pub fn new(config: Arc<Config>, store: ThreadStore, delivery: D) -> Self {
        Self {
            config,
            store,
            delivery,
        }
    }

    /// Decode and dispatch one raw hook payload
    pub async fn dispatch_raw(&self, raw: &str) -> Result<DispatchReport, DispatchError> {
        let event = match classify::decode(raw) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    component = "dispatch",
                    event = "dispatch.classification_failed",
                    error = %e,
                    payload = %raw,
                    "Malformed hook payload"
                );
                return Err(e.into());
            }
        };
        self.dispatch(&event).await
    }

    pub async fn dispatch(&self, event: &HookEvent) -> Result<DispatchReport, DispatchError> {
        let span = info_span!(
            "dispatch",
            dispatch_id = %Uuid::new_v4(),
            session_id = %event.session_id(),
            hook_event = %event.kind(),
        );

        async {
            let deadline = self.config.deadline;
            let result = match tokio::time::timeout(deadline, self.run(event)).await {
                Ok(result) => result,
                Err(_) => Err(DispatchError::DeadlineExceeded(deadline)),
            };

            match &result {
                Ok(report) => info!(
                    component = "dispatch",
                    event = "dispatch.finished",
                    state = report.state.as_str(),
                    thread_state = report.thread_state.map(DispatchState::as_str),
                    thread_id = report.thread_id.as_deref(),
                    message_id = report.message_id.as_deref(),
                ),
                Err(e) => error!(
                    component = "dispatch",
                    event = "dispatch.failed",
                    state = e.state().as_str(),
                    error = %e,
                ),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, event: &HookEvent) -> Result<DispatchReport, DispatchError> {
        if !classify::should_emit(event, &self.config.filters) {
            debug!(
                component = "dispatch",
                event = "dispatch.filtered",
                tool = event.tool_name(),
            );
            return Ok(DispatchReport::filtered());
        }

        let key = classify::classify(event);
        let mut message = format::format(event, key);
        if let Some(user_id) = self.config.mention_user_id.as_deref() {
            if matches!(event.kind(), EventKind::Notification | EventKind::Stop) {
                message = message.with_mention(user_id);
            }
        }

        let channel = self.config.channel_key();
        let (target, thread_state) = if self.config.use_threads {
            let (thread_id, state) = self.thread_for(event.session_id(), &channel).await?;
            (PostTarget::Thread(thread_id), Some(state))
        } else {
            (PostTarget::Channel(channel.clone()), None)
        };

        let message_id = self.delivery.post_message(&target, &message).await?;

        let thread_id = match target {
            PostTarget::Thread(id) => {
                if let Err(e) = self.store.touch(event.session_id(), &channel).await {
                    warn!(
                        component = "dispatch",
                        event = "dispatch.touch_failed",
                        error = %e,
                        "Delivered but could not record it"
                    );
                }
                Some(id)
            }
            PostTarget::Channel(_) => None,
        };

        Ok(DispatchReport {
            state: DispatchState::Delivered,
            thread_state,
            thread_id,
            message_id: Some(message_id),
        })
    }

    /// Thread for `session_id`, creating and binding one on first use.
    async fn thread_for(
        &self,
        session_id: &str,
        channel: &str,
    ) -> Result<(String, DispatchState), DispatchError> {
        if let Some(binding) = self.store.resolve(session_id, channel).await? {
            return Ok((binding.thread_id, DispatchState::ThreadResolved));
        }

        let title = thread_name(&self.config.thread_prefix, session_id);
        let created = self.delivery.create_thread(channel, &title).await?;

        match self.store.bind(session_id, channel, &created).await {
            Ok(binding) => Ok((binding.thread_id, DispatchState::ThreadCreated)),
            Err(StoreError::Conflict { .. }) => {
                // Lost the race; the winner's thread is the session's thread
                let winner = self.store.resolve(session_id, channel).await?.ok_or_else(|| {
                    DispatchError::LostBinding {
                        session_id: session_id.to_string(),
                    }
                })?;
                info!(
                    component = "dispatch",
                    event = "dispatch.bind_conflict",
                    discarded_thread_id = %created,
                    thread_id = %winner.thread_id,
                    "Concurrent dispatch bound this session first"
                );
                Ok((winner.thread_id, DispatchState::ThreadResolved))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use hookcord_protocol::OutboundMessage;

    use crate::config::tests::args;

    #[derive(Default)]
    struct ScriptedDelivery {
        threads_created: AtomicUsize,
        posts: Mutex<Vec<(PostTarget, OutboundMessage)>>,
        fail_create: bool,
        reject_posts: bool,
        post_delay: Option<Duration>,
    }

    impl ScriptedDelivery {
        fn posts(&self) -> Vec<(PostTarget, OutboundMessage)> {
            self.posts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Delivery for ScriptedDelivery {
        async fn create_thread(
            &self,
            _channel_id: &str,
            _title: &str,
        ) -> Result<String, DeliveryError> {
            if self.fail_create {
                return Err(DeliveryError::Exhausted {
                    operation: "create_thread",
                    attempts: 5,
                    last_error: "HTTP 503".to_string(),
                });
            }
            let n = self.threads_created.fetch_add(1, Ordering::SeqCst) + 1;
            // Widen the resolve/bind race window
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(format!("T{}", n))
        }

        async fn post_message(
            &self,
            target: &PostTarget,
            message: &OutboundMessage,
        ) -> Result<String, DeliveryError> {
            if let Some(delay) = self.post_delay {
                tokio::time::sleep(delay).await;
            }
            if self.reject_posts {
                return Err(DeliveryError::Rejected {
                    operation: "post_message",
                    status: 403,
                    body: "Missing Access".to_string(),
                });
            }
            let mut posts = self.posts.lock().unwrap();
            posts.push((target.clone(), message.clone()));
            Ok(format!("m{}", posts.len()))
        }
    }

    const CHANNEL: &str = "111222333";

    fn threaded_config(extra: &[&str]) -> Arc<Config> {
        let mut argv = vec![
            "--bot-token",
            "tok",
            "--channel-id",
            CHANNEL,
            "--use-threads",
            "true",
        ];
        argv.extend_from_slice(extra);
        Arc::new(Config::from_args(&args(&argv)).unwrap())
    }

    async fn engine(
        config: Arc<Config>,
        delivery: ScriptedDelivery,
    ) -> (tempfile::TempDir, Arc<DispatchEngine<ScriptedDelivery>>) {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::open(dir.path().join("hookcord.db"))
            .await
            .unwrap();
        (dir, Arc::new(DispatchEngine::new(config, store, delivery)))
    }

    fn pre_tool(session: &str, tool: &str) -> String {
        format!(
            r#"{{"session_id":"{}","hook_event_name":"PreToolUse","timestamp":"2026-03-01T10:00:00Z","tool_name":"{}","tool_input":{{"command":"ls"}}}}"#,
            session, tool
        )
    }

    fn post_tool(session: &str, tool: &str) -> String {
        format!(
            r#"{{"session_id":"{}","hook_event_name":"PostToolUse","timestamp":"2026-03-01T10:00:01Z","tool_name":"{}","tool_input":{{}},"tool_response":{{"stdout":"ok"}}}}"#,
            session, tool
        )
    }

    #[tokio::test]
    async fn first_event_creates_thread_second_reuses_it() {
        let (_dir, engine) = engine(threaded_config(&[]), ScriptedDelivery::default()).await;

        let first = engine.dispatch_raw(&pre_tool("abc", "Bash")).await.unwrap();
        assert_eq!(first.state, DispatchState::Delivered);
        assert_eq!(first.thread_state, Some(DispatchState::ThreadCreated));
        assert_eq!(first.thread_id.as_deref(), Some("T1"));

        let second = engine.dispatch_raw(&post_tool("abc", "Bash")).await.unwrap();
        assert_eq!(second.thread_state, Some(DispatchState::ThreadResolved));
        assert_eq!(second.thread_id.as_deref(), Some("T1"));

        let binding = engine.store.resolve("abc", CHANNEL).await.unwrap().unwrap();
        assert_eq!(binding.thread_id, "T1");
        assert_eq!(binding.message_count, 2);
        assert_eq!(engine.delivery.threads_created.load(Ordering::SeqCst), 1);

        let targets: Vec<PostTarget> = engine.delivery.posts().into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            targets,
            [PostTarget::Thread("T1".into()), PostTarget::Thread("T1".into())]
        );
    }

    #[tokio::test]
    async fn racing_dispatches_share_one_thread() {
        let (_dir, engine) = engine(threaded_config(&[]), ScriptedDelivery::default()).await;

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            tasks.spawn(async move { engine.dispatch_raw(&pre_tool("abc", "Bash")).await });
        }
        let mut threads = HashSet::new();
        while let Some(result) = tasks.join_next().await {
            let report = result.unwrap().expect("dispatch succeeds");
            threads.insert(report.thread_id.unwrap());
        }

        let bindings = engine.store.list(10).await.unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(threads, HashSet::from([bindings[0].thread_id.clone()]));
        assert_eq!(bindings[0].message_count, 8);

        for (target, _) in engine.delivery.posts() {
            assert_eq!(target, PostTarget::Thread(bindings[0].thread_id.clone()));
        }
    }

    #[tokio::test]
    async fn disabled_tool_never_reaches_delivery() {
        let (_dir, engine) = engine(
            threaded_config(&["--disabled-tools", "Read"]),
            ScriptedDelivery::default(),
        )
        .await;

        let report = engine.dispatch_raw(&pre_tool("abc", "Read")).await.unwrap();
        assert_eq!(report.state, DispatchState::Filtered);
        assert!(engine.delivery.posts().is_empty());
        assert_eq!(engine.delivery.threads_created.load(Ordering::SeqCst), 0);
        assert!(engine.store.resolve("abc", CHANNEL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_thread_creation_leaves_no_binding() {
        let delivery = ScriptedDelivery {
            fail_create: true,
            ..Default::default()
        };
        let (_dir, engine) = engine(threaded_config(&[]), delivery).await;

        let err = engine.dispatch_raw(&pre_tool("abc", "Bash")).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Delivery(DeliveryError::Exhausted { .. })
        ));
        assert_eq!(err.state(), DispatchState::Failed);
        assert!(engine.store.resolve("abc", CHANNEL).await.unwrap().is_none());
        assert!(engine.delivery.posts().is_empty());
    }

    #[tokio::test]
    async fn rejected_post_keeps_completed_binding_untouched() {
        let delivery = ScriptedDelivery {
            reject_posts: true,
            ..Default::default()
        };
        let (_dir, engine) = engine(threaded_config(&[]), delivery).await;

        let err = engine.dispatch_raw(&pre_tool("abc", "Bash")).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Delivery(DeliveryError::Rejected { status: 403, .. })
        ));
        let binding = engine.store.resolve("abc", CHANNEL).await.unwrap().unwrap();
        assert_eq!(binding.thread_id, "T1");
        assert_eq!(binding.message_count, 0);
    }

    #[tokio::test]
    async fn thread_mode_off_posts_to_channel() {
        let config = Arc::new(
            Config::from_args(&args(&["--bot-token", "tok", "--channel-id", CHANNEL])).unwrap(),
        );
        let (_dir, engine) = engine(config, ScriptedDelivery::default()).await;

        let report = engine.dispatch_raw(&pre_tool("abc", "Bash")).await.unwrap();
        assert_eq!(report.state, DispatchState::Delivered);
        assert_eq!(report.thread_state, None);
        assert_eq!(
            engine.delivery.posts()[0].0,
            PostTarget::Channel(CHANNEL.to_string())
        );
        assert!(engine.store.list(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_fails_without_network() {
        let (_dir, engine) = engine(threaded_config(&[]), ScriptedDelivery::default()).await;

        let err = engine
            .dispatch_raw(r#"{"hook_event_name":"PreToolUse"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Classification(_)));
        assert!(engine.delivery.posts().is_empty());
        assert_eq!(engine.delivery.threads_created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mention_only_on_notification_and_stop() {
        let (_dir, engine) = engine(
            threaded_config(&["--mention-user-id", "12345678901234567"]),
            ScriptedDelivery::default(),
        )
        .await;

        engine.dispatch_raw(&pre_tool("abc", "Bash")).await.unwrap();
        engine
            .dispatch_raw(r#"{"session_id":"abc","hook_event_name":"Notification","message":"Waiting"}"#)
            .await
            .unwrap();
        engine
            .dispatch_raw(r#"{"session_id":"abc","hook_event_name":"Stop"}"#)
            .await
            .unwrap();

        let contents: Vec<Option<String>> = engine
            .delivery
            .posts()
            .into_iter()
            .map(|(_, m)| m.content)
            .collect();
        assert_eq!(
            contents,
            [
                None,
                Some("<@12345678901234567>".to_string()),
                Some("<@12345678901234567>".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn slow_delivery_hits_outer_deadline() {
        let mut config = Config::from_args(&args(&["--bot-token", "tok", "--channel-id", CHANNEL]))
            .unwrap();
        config.deadline = Duration::from_millis(50);
        let delivery = ScriptedDelivery {
            post_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let (_dir, engine) = engine(Arc::new(config), delivery).await;

        let err = engine.dispatch_raw(&pre_tool("abc", "Bash")).await.unwrap_err();
        assert!(matches!(err, DispatchError::DeadlineExceeded(_)));
        assert!(engine.delivery.posts().is_empty());
    }
}
