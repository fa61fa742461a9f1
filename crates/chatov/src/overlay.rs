//! Single-threaded overlay event loop.
//!
//! Poll responses, fired removal timers and scale controls interleave on one task; each
//! handler runs to completion before the next event is looked at.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    time::{sleep, Instant},
};
use tokio_util::sync::CancellationToken;

use chatov_core::{
    buffer::MessageBuffer,
    config::Config,
    ports::{HttpResponse, Renderer, Transport},
    scale::DisplayScaleController,
    sync::{SyncClient, SyncError},
};

use crate::scheduler::TokioScheduler;

/// External display-scale inputs (viewport / user parameter changes).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Control {
    UserScale(f64),
    DevicePixelRatio(f64),
}

/// Parse a console command: `scale <factor>` or `dpr <ratio>`.
pub fn parse_control(line: &str) -> Option<Control> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next()?;
    let value = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    match cmd {
        "scale" => Some(Control::UserScale(value)),
        "dpr" => Some(Control::DevicePixelRatio(value)),
        _ => None,
    }
}

type PendingRequest = Pin<Box<dyn Future<Output = Result<HttpResponse, SyncError>> + Send>>;

/// Resolves with the in-flight response, or never when nothing is in flight.
async fn response(pending: &mut Option<PendingRequest>) -> Result<HttpResponse, SyncError> {
    match pending {
        Some(request) => request.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Drive the overlay until `shutdown` fires. Returns the buffer for inspection.
///
/// Responses are applied straight into the buffer, so a message that fails to render stops
/// the batch, keeps the cursor before it and takes the protocol-error backoff.
pub async fn run<R: Renderer>(
    cfg: &Config,
    transport: Arc<dyn Transport>,
    renderer: R,
    mut controls: mpsc::UnboundedReceiver<Control>,
    shutdown: CancellationToken,
) -> MessageBuffer<R, TokioScheduler> {
    let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();

    let mut buffer = MessageBuffer::new(cfg.buffer, renderer, TokioScheduler::new(timer_tx));
    let mut scale = DisplayScaleController::new();
    scale.recompute(cfg.user_scale, cfg.device_pixel_ratio, &mut buffer);

    let mut sync = SyncClient::new(transport, cfg.retry);
    let mut pending: Option<PendingRequest> = None;
    let next_poll = sleep(Duration::ZERO);
    tokio::pin!(next_poll);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            () = &mut next_poll, if pending.is_none() => {
                let request: PendingRequest = Box::pin(sync.begin());
                pending = Some(request);
            }
            resp = response(&mut pending) => {
                pending = None;
                let outcome = sync.complete(resp, &mut buffer);
                next_poll.as_mut().reset(Instant::now() + outcome.next_delay);
            }
            Some((id, event)) = timer_rx.recv() => {
                if buffer.scheduler_mut().claim(id) {
                    buffer.on_timer(event);
                }
            }
            Some(control) = controls.recv() => {
                match control {
                    Control::UserScale(v) => scale.set_user_scale(v, &mut buffer),
                    Control::DevicePixelRatio(v) => scale.set_device_pixel_ratio(v, &mut buffer),
                };
            }
        }
    }

    buffer
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use chatov_core::{
        domain::Tier,
        errors::Error,
        ports::{Cursor, MessageView, NodeId, TransportError},
        Result,
    };

    use super::*;

    /// Serves `bodies` in order, then connection errors. Records every request.
    struct ScriptedTransport {
        bodies: Mutex<VecDeque<String>>,
        requests: Mutex<Vec<(Instant, Option<Cursor>)>>,
    }

    impl ScriptedTransport {
        fn new(bodies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                bodies: Mutex::new(bodies.iter().map(|b| b.to_string()).collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get_messages(
            &self,
            cursor: Option<&Cursor>,
        ) -> std::result::Result<HttpResponse, TransportError> {
            self.requests
                .lock()
                .unwrap()
                .push((Instant::now(), cursor.cloned()));
            match self.bodies.lock().unwrap().pop_front() {
                Some(body) => Ok(HttpResponse {
                    status: 200,
                    reason: "OK".to_string(),
                    body,
                }),
                None => Err(TransportError::Connection("closed".to_string())),
            }
        }
    }

    #[derive(Clone, Default)]
    struct Log {
        created: Arc<Mutex<Vec<String>>>,
        destroyed: Arc<Mutex<Vec<NodeId>>>,
        sources: Arc<Mutex<Vec<String>>>,
    }

    struct LogRenderer {
        log: Log,
        next: u64,
    }

    impl Renderer for LogRenderer {
        fn create(&mut self, view: &MessageView<'_>) -> Result<NodeId> {
            self.log.created.lock().unwrap().push(view.text.to_string());
            self.next += 1;
            Ok(NodeId(self.next - 1))
        }

        fn set_badge_source(&mut self, _node: NodeId, _slot: usize, locator: &str) -> Result<()> {
            self.log.sources.lock().unwrap().push(locator.to_string());
            Ok(())
        }

        fn mark_removing(&mut self, _node: NodeId) {}

        fn destroy(&mut self, node: NodeId) {
            self.log.destroyed.lock().unwrap().push(node);
        }
    }

    /// Every node creation fails.
    struct BrokenRenderer;

    impl Renderer for BrokenRenderer {
        fn create(&mut self, _view: &MessageView<'_>) -> Result<NodeId> {
            Err(Error::Render("display surface unavailable".to_string()))
        }

        fn set_badge_source(&mut self, _node: NodeId, _slot: usize, _locator: &str) -> Result<()> {
            Ok(())
        }

        fn mark_removing(&mut self, _node: NodeId) {}

        fn destroy(&mut self, _node: NodeId) {}
    }

    const BATCH: &str = r##"{"sid": "s", "messages": [
        {"mid": 1, "user": "a", "user_color": "#fff", "message": "one",
         "badges": [{"1": "b@1", "2": "b@2"}]},
        {"mid": 2, "user": "b", "user_color": "#fff", "message": "two"}
    ]}"##;

    #[test]
    fn parses_controls() {
        assert_eq!(parse_control("scale 1.5"), Some(Control::UserScale(1.5)));
        assert_eq!(parse_control(" dpr 2 "), Some(Control::DevicePixelRatio(2.0)));
        assert_eq!(parse_control("scale"), None);
        assert_eq!(parse_control("zoom 2"), None);
        assert_eq!(parse_control("dpr 2 3"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_show_then_expire() {
        let transport = ScriptedTransport::new(&[BATCH]);
        let log = Log::default();
        let renderer = LogRenderer {
            log: log.clone(),
            next: 0,
        };
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let cfg = Config::default();

        let checker = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            assert_eq!(*log.created.lock().unwrap(), vec!["one", "two"]);
            assert!(log.destroyed.lock().unwrap().is_empty());

            control_tx.send(Control::UserScale(2.0)).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(*log.sources.lock().unwrap(), vec!["b@2"]);

            // 10s display + 1s exit transition.
            tokio::time::sleep(Duration::from_secs(7)).await;
            assert_eq!(log.destroyed.lock().unwrap().len(), 2);
            shutdown.cancel();
        };

        let (buffer, ()) = tokio::join!(
            run(&cfg, transport, renderer, control_rx, shutdown.clone()),
            checker
        );
        assert!(buffer.is_empty());
        assert_eq!(buffer.tier(), Tier(2));
        assert_eq!(buffer.scheduler().pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn render_failure_backs_off_without_advancing_cursor() {
        let transport = ScriptedTransport::new(&[BATCH]);
        let (_control_tx, control_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let cfg = Config::default();
        let start = Instant::now();

        let checker = async {
            // A clean batch would have polled again after 250 ms.
            sleep(Duration::from_secs(1)).await;
            assert_eq!(transport.requests.lock().unwrap().len(), 1);

            sleep(Duration::from_millis(4_100)).await;
            {
                let requests = transport.requests.lock().unwrap();
                assert_eq!(requests.len(), 2);
                let (at, cursor) = &requests[1];
                assert!(*at - start >= cfg.retry.protocol_retry);
                assert_eq!(*cursor, None);
            }
            shutdown.cancel();
        };

        let (buffer, ()) = tokio::join!(
            run(&cfg, transport.clone(), BrokenRenderer, control_rx, shutdown.clone()),
            checker
        );
        assert!(buffer.is_empty());
        assert_eq!(buffer.last_processed(), None);
    }
}
