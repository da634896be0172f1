//! Background task driving the delivery queue.
//!
//! One task owns the [`DeliveryQueue`]. Enqueues, flush triggers, timer
//! ticks, transport completions and shutdown all reach it as messages and
//! are handled one at a time, so the queue needs no locking.

use crate::config::{Config, FlushMechanism};
use crate::message::Message;
use crate::queue::{Delivery, DeliveryOutcome, DeliveryQueue};
use crate::store::SettingsStore;
use crate::transport::Transport;
use crate::Error;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Capacity of the delivery notification channel.
pub const DELIVERY_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
enum Command {
    Enqueue(Message),
    Flush,
    Backgrounded,
    Reconfigure(Config),
    PendingCount(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle for sending commands to the dispatcher task.
///
/// Dropping every handle stops the task and persists the pending messages.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl QueueHandle {
    fn send(&self, command: Command) -> Result<(), Error> {
        self.tx.send(command).map_err(|_| Error::Shutdown)
    }

    /// Queue a message for delivery.
    pub fn enqueue(&self, message: Message) -> Result<(), Error> {
        self.send(Command::Enqueue(message))
    }

    /// Start delivering the head of the queue.
    pub fn flush(&self) -> Result<(), Error> {
        self.send(Command::Flush)
    }

    /// Report that the application moved to the background.
    pub fn app_backgrounded(&self) -> Result<(), Error> {
        self.send(Command::Backgrounded)
    }

    /// Replace the flush configuration.
    pub fn reconfigure(&self, config: Config) -> Result<(), Error> {
        self.send(Command::Reconfigure(config))
    }

    /// Get the number of queued messages.
    pub async fn pending_count(&self) -> Result<usize, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::PendingCount(reply))?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Stop the task and persist the pending messages.
    pub async fn shutdown(&self) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown(reply))?;
        rx.await.map_err(|_| Error::Shutdown)
    }
}

/// Spawn the dispatcher task.
///
/// The task first restores the messages persisted by the previous run.
/// Must be called within a tokio runtime.
pub fn spawn(
    config: Config,
    transport: Arc<dyn Transport>,
    store: Arc<dyn SettingsStore>,
) -> (QueueHandle, mpsc::Receiver<Delivery>) {
    let (tx, commands) = mpsc::unbounded_channel();
    let (completions_tx, completions) = mpsc::unbounded_channel();
    let (deliveries, deliveries_rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);

    let dispatcher = Dispatcher {
        queue: DeliveryQueue::new(&config),
        config,
        transport,
        store,
        deliveries,
        completions_tx,
        timer: None,
    };
    tokio::spawn(dispatcher.run(commands, completions));

    (QueueHandle { tx }, deliveries_rx)
}

struct Dispatcher {
    config: Config,
    queue: DeliveryQueue,
    transport: Arc<dyn Transport>,
    store: Arc<dyn SettingsStore>,
    deliveries: mpsc::Sender<Delivery>,
    completions_tx: mpsc::UnboundedSender<DeliveryOutcome>,
    timer: Option<Interval>,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<DeliveryOutcome>,
    ) {
        info!(
            flush_mechanism = ?self.config.flush_mechanism(),
            flush_interval_secs = self.config.flush_interval().as_secs(),
            messages_to_flush = self.config.messages_to_flush(),
            "starting delivery queue"
        );

        self.queue.restore(self.store.as_ref());
        self.reset_timer();
        let next = self.queue.process();
        self.post(next);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Enqueue(message)) => {
                        let next = self.queue.enqueue(message);
                        self.post(next);
                    }
                    Some(Command::Flush) => {
                        debug!("manual flush");
                        let next = self.queue.flush();
                        self.post(next);
                    }
                    Some(Command::Backgrounded) => self.backgrounded(),
                    Some(Command::Reconfigure(config)) => self.reconfigure(config),
                    Some(Command::PendingCount(reply)) => {
                        let _ = reply.send(self.queue.len());
                    }
                    Some(Command::Shutdown(reply)) => {
                        self.stop(&mut commands, vec![reply]);
                        return;
                    }
                    None => {
                        self.stop(&mut commands, Vec::new());
                        return;
                    }
                },
                Some(outcome) = completions.recv() => self.complete(outcome),
                _ = next_tick(&mut self.timer) => {
                    debug!("interval timeout");
                    let next = self.queue.flush();
                    self.post(next);
                }
            }
        }
    }

    fn reset_timer(&mut self) {
        self.timer = match self.config.flush_mechanism() {
            FlushMechanism::Automatic => {
                let period = self.config.flush_interval();
                let mut timer = interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(timer)
            }
            FlushMechanism::Manual => None,
        };
    }

    fn backgrounded(&mut self) {
        let subscribed = self.config.flush_mechanism() == FlushMechanism::Automatic
            && self.config.thumbnail_flush();
        if !subscribed {
            return;
        }

        debug!("application backgrounded");
        let next = self.queue.flush();
        self.post(next);
    }

    fn reconfigure(&mut self, config: Config) {
        info!(
            flush_mechanism = ?config.flush_mechanism(),
            messages_to_flush = config.messages_to_flush(),
            "delivery queue reconfigured"
        );
        self.queue.reconfigure(&config);
        self.config = config;
        self.reset_timer();

        let next = self.queue.process();
        self.post(next);
    }

    fn post(&mut self, message: Option<Message>) {
        let Some(message) = message else {
            return;
        };

        let url = match message.to_request(&self.config) {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "failed to build request");
                let _ = self.completions_tx.send(DeliveryOutcome::NetworkError);
                return;
            }
        };

        let transport = self.transport.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = transport.get(&url).await;
            let outcome = DeliveryOutcome::classify(&result);
            if let Err(e) = &result {
                debug!(error = %e, ?outcome, "request failed");
            }
            // The dispatcher may have shut down meanwhile.
            let _ = completions.send(outcome);
        });
    }

    fn complete(&mut self, outcome: DeliveryOutcome) {
        let Some((delivery, next)) = self.queue.complete(outcome) else {
            return;
        };
        self.notify(delivery);
        self.post(next);
    }

    fn notify(&self, delivery: Delivery) {
        match self.deliveries.try_send(delivery) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(delivery)) => {
                debug!(outcome = ?delivery.outcome, "delivery notification dropped");
            }
        }
    }

    /// Take in every command already sent, persist the queue and answer the
    /// shutdown callers.
    ///
    /// Late enqueues are kept without evaluating the flush thresholds.
    fn stop(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        mut replies: Vec<oneshot::Sender<()>>,
    ) {
        commands.close();
        while let Ok(command) = commands.try_recv() {
            match command {
                Command::Enqueue(message) => self.queue.append(message),
                Command::PendingCount(reply) => {
                    let _ = reply.send(self.queue.len());
                }
                Command::Shutdown(reply) => replies.push(reply),
                Command::Flush | Command::Backgrounded | Command::Reconfigure(_) => {}
            }
        }

        self.teardown();
        for reply in replies {
            let _ = reply.send(());
        }
    }

    fn teardown(&mut self) {
        self.timer = None;
        if let Err(e) = self.queue.persist(self.store.as_ref()) {
            error!(error = %e, "failed to save pending messages");
        }
        info!(pending = self.queue.len(), "delivery queue stopped");
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
