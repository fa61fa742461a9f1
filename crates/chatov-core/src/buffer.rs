//! Bounded, newest-first buffer of on-screen messages.
//!
//! Each entry owns exactly one live timer until it is destroyed: first the display timeout
//! (`Expire`), then the exit transition (`Destroy`). Eviction cancels whichever is live before
//! tearing the node down, so a stale timer never reaches a destroyed node.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use crate::{
    domain::{Message, MessageId, Tier},
    ports::{EntryId, MessageSink, MessageView, NodeId, Renderer, Scheduler, TimerEvent, TimerId},
    scale::ImageTarget,
    variants::select,
    Result,
};

pub const MESSAGE_COUNT_MAX: usize = 35;
pub const MESSAGE_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const MESSAGE_REMOVE_ANIMATION_DURATION: Duration = Duration::from_millis(1_000);

#[derive(Clone, Copy, Debug)]
pub struct BufferConfig {
    pub max_messages: usize,
    pub message_timeout: Duration,
    pub remove_animation: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_messages: MESSAGE_COUNT_MAX,
            message_timeout: MESSAGE_TIMEOUT,
            remove_animation: MESSAGE_REMOVE_ANIMATION_DURATION,
        }
    }
}

#[derive(Debug)]
struct RenderedBadge {
    /// Index into `Message::badges`.
    variant_index: usize,
    locator: String,
}

#[derive(Debug)]
struct DisplayedMessage {
    entry: EntryId,
    message: Message,
    node: NodeId,
    badges: Vec<RenderedBadge>,
    removing: bool,
}

pub struct MessageBuffer<R, S> {
    cfg: BufferConfig,
    renderer: R,
    scheduler: S,
    tier: Tier,
    /// Front is the newest entry.
    entries: VecDeque<DisplayedMessage>,
    timers: HashMap<EntryId, TimerId>,
    next_entry: u64,
    last_processed: Option<MessageId>,
}

impl<R: Renderer, S: Scheduler> MessageBuffer<R, S> {
    pub fn new(cfg: BufferConfig, renderer: R, scheduler: S) -> Self {
        Self {
            cfg,
            renderer,
            scheduler,
            tier: Tier::BASE,
            entries: VecDeque::new(),
            timers: HashMap::new(),
            next_entry: 0,
            last_processed: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Id of the most recently appended message.
    pub fn last_processed(&self) -> Option<&MessageId> {
        self.last_processed.as_ref()
    }

    /// Displayed message ids, newest first.
    pub fn message_ids(&self) -> impl Iterator<Item = &MessageId> {
        self.entries.iter().map(|e| &e.message.id)
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Evict down to capacity, render `msg` at the newest end and arm its display timeout.
    pub fn append(&mut self, msg: Message) -> Result<EntryId> {
        let max = self.cfg.max_messages.max(1);
        while self.entries.len() >= max {
            self.evict_oldest();
        }

        let tier = self.tier;
        let mut badges = Vec::with_capacity(msg.badges.len());
        for (variant_index, set) in msg.badges.iter().enumerate() {
            match select(set, tier) {
                Ok(locator) => badges.push(RenderedBadge {
                    variant_index,
                    locator: locator.to_string(),
                }),
                Err(e) => {
                    tracing::warn!(message_id = %msg.id, badge = variant_index, "skipping badge: {e}");
                }
            }
        }

        let node = {
            let view = MessageView {
                author: &msg.author,
                author_color: &msg.author_color,
                text: &msg.text,
                badges: badges.iter().map(|b| b.locator.as_str()).collect(),
                reply: msg.reply.as_ref(),
            };
            self.renderer.create(&view)?
        };

        let entry = EntryId(self.next_entry);
        self.next_entry += 1;

        let timer = self
            .scheduler
            .schedule(self.cfg.message_timeout, TimerEvent::Expire(entry));
        self.timers.insert(entry, timer);

        self.last_processed = Some(msg.id.clone());
        self.entries.push_front(DisplayedMessage {
            entry,
            message: msg,
            node,
            badges,
            removing: false,
        });

        Ok(entry)
    }

    /// Drive the removal lifecycle. Returns `false` for events whose entry is already gone.
    pub fn on_timer(&mut self, event: TimerEvent) -> bool {
        match event {
            TimerEvent::Expire(entry) => {
                let Some(pos) = self.position(entry) else {
                    return false;
                };
                let displayed = &mut self.entries[pos];
                if displayed.removing {
                    return false;
                }
                displayed.removing = true;
                let node = displayed.node;

                self.timers.remove(&entry);
                self.renderer.mark_removing(node);
                let timer = self
                    .scheduler
                    .schedule(self.cfg.remove_animation, TimerEvent::Destroy(entry));
                self.timers.insert(entry, timer);
                true
            }
            TimerEvent::Destroy(entry) => {
                let Some(pos) = self.position(entry) else {
                    return false;
                };
                if !self.entries[pos].removing {
                    return false;
                }
                let Some(displayed) = self.entries.remove(pos) else {
                    return false;
                };
                self.timers.remove(&entry);
                self.renderer.destroy(displayed.node);
                true
            }
        }
    }

    fn position(&self, entry: EntryId) -> Option<usize> {
        self.entries.iter().position(|e| e.entry == entry)
    }

    fn evict_oldest(&mut self) {
        let Some(oldest) = self.entries.pop_back() else {
            return;
        };
        if let Some(timer) = self.timers.remove(&oldest.entry) {
            self.scheduler.cancel(timer);
        }
        self.renderer.destroy(oldest.node);
        tracing::debug!(message_id = %oldest.message.id, "evicted oldest message");
    }
}

impl<R: Renderer, S: Scheduler> ImageTarget for MessageBuffer<R, S> {
    fn reselect_images(&mut self, tier: Tier) {
        self.tier = tier;
        for displayed in self.entries.iter_mut() {
            for (slot, badge) in displayed.badges.iter_mut().enumerate() {
                let set = &displayed.message.badges[badge.variant_index];
                let Ok(locator) = select(set, tier) else {
                    continue;
                };
                if locator == badge.locator {
                    continue;
                }
                if let Err(e) = self.renderer.set_badge_source(displayed.node, slot, locator) {
                    tracing::warn!(message_id = %displayed.message.id, "badge update failed: {e}");
                    continue;
                }
                badge.locator = locator.to_string();
            }
        }
    }
}

impl<R: Renderer, S: Scheduler> MessageSink for MessageBuffer<R, S> {
    fn append(&mut self, msg: Message) -> Result<()> {
        MessageBuffer::append(self, msg).map(|_| ())
    }
}
