//! Bot lifecycle supervisor.
//!
//! Owns one polling worker per running bot. Each worker holds a long poll
//! against Telegram and processes its batch serially, so per-chat ordering
//! follows Telegram's own delivery order. The supervisor's in-memory map is
//! the truth about who is running; the persisted `is_running` flag follows
//! it and a periodic reconciler repairs drift after crashes.

use crate::logbuf::LogCategory;
use crate::pipeline;
use crate::state::AppContext;
use crate::store::BotInput;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::UpdateKind;
use teloxide::{ApiError, RequestError};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Long-poll timeout handed to Telegram, seconds.
const POLL_TIMEOUT_SECS: u32 = 25;

/// Pause before opening a poll, lets a previous holder of the token wind down.
const PRE_START_DELAY: Duration = Duration::from_secs(1);

/// Quiesce after stopping a worker.
const POST_STOP_DELAY: Duration = Duration::from_millis(500);

const STOP_ATTEMPTS: u32 = 3;

/// How often the reconciler compares the persisted flag with reality.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

struct WorkerHandle {
    bot: Bot,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

pub struct Supervisor {
    ctx: Arc<AppContext>,
    workers: RwLock<HashMap<String, WorkerHandle>>,
}

impl Supervisor {
    pub fn new(ctx: Arc<AppContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            workers: RwLock::new(HashMap::new()),
        })
    }

    pub async fn is_worker_active(&self, bot_id: &str) -> bool {
        self.workers.read().await.contains_key(bot_id)
    }

    pub async fn active_ids(&self) -> Vec<String> {
        self.workers.read().await.keys().cloned().collect()
    }

    /// Opens a polling worker for the bot and marks it running.
    pub async fn start(self: &Arc<Self>, bot_id: &str) -> anyhow::Result<()> {
        if self.is_worker_active(bot_id).await {
            anyhow::bail!("Бот уже запущен");
        }

        let row = self
            .ctx
            .store
            .get_bot(bot_id)?
            .ok_or_else(|| anyhow::anyhow!("Бот не найден"))?;

        tokio::time::sleep(PRE_START_DELAY).await;

        let bot = Bot::new(row.token.clone());

        if let Err(e) = bot.delete_webhook().await {
            debug!("delete_webhook on start for {}: {}", row.name, e);
        }

        // Identity discovery runs in the background; polling does not wait
        // for it.
        {
            let ctx = self.ctx.clone();
            let bot = bot.clone();
            let bot_id = bot_id.to_string();
            tokio::spawn(async move {
                match bot.get_me().await {
                    Ok(me) => {
                        let user = me.user.clone();
                        if let Err(e) = ctx.store.set_telegram_info(
                            &bot_id,
                            user.username.as_deref(),
                            &user.first_name,
                            user.id.0 as i64,
                        ) {
                            warn!("failed to persist telegram info: {}", e);
                        }
                        ctx.logs.info(
                            LogCategory::Telegram,
                            format!(
                                "bot {} identified as @{}",
                                bot_id,
                                user.username.as_deref().unwrap_or("unknown")
                            ),
                        );
                    }
                    Err(e) => {
                        ctx.logs.warning(
                            LogCategory::Telegram,
                            format!("getMe failed for bot {}: {}", bot_id, e),
                        );
                    }
                }
            });
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(poll_loop(
            self.clone(),
            self.ctx.clone(),
            bot.clone(),
            bot_id.to_string(),
            shutdown_rx,
        ));

        self.workers.write().await.insert(
            bot_id.to_string(),
            WorkerHandle {
                bot,
                shutdown: shutdown_tx,
                join,
            },
        );

        self.ctx.store.set_running(bot_id, true)?;
        self.ctx.logs.success(
            LogCategory::Bot,
            format!("bot {} ({}) started", row.name, bot_id),
        );
        Ok(())
    }

    /// Stops the worker. Never fails: residual errors are logged and the
    /// worker is force-removed.
    pub async fn stop(&self, bot_id: &str) {
        // Removing the handle first makes in-flight handlers drop their
        // messages at the pipeline health check.
        let handle = self.workers.write().await.remove(bot_id);

        if let Some(handle) = handle {
            let _ = handle.shutdown.send(true);

            // deleteWebhook is idempotent; "not set" is fine.
            if let Err(e) = handle.bot.delete_webhook().await {
                debug!("delete_webhook on stop for {}: {}", bot_id, e);
            }

            let mut join = handle.join;
            let mut stopped = false;
            for attempt in 1..=STOP_ATTEMPTS {
                match tokio::time::timeout(Duration::from_secs(1), &mut join).await {
                    Ok(_) => {
                        stopped = true;
                        break;
                    }
                    Err(_) => {
                        debug!("stop attempt {}/{} for {}", attempt, STOP_ATTEMPTS, bot_id);
                        let _ = handle.shutdown.send(true);
                    }
                }
            }
            if !stopped {
                warn!("worker {} did not stop in time, detaching", bot_id);
                join.abort();
            }
        }

        self.ctx.registry.clear_bot(bot_id);
        tokio::time::sleep(POST_STOP_DELAY).await;

        if let Err(e) = self.ctx.store.set_running(bot_id, false) {
            warn!("failed to clear running flag for {}: {}", bot_id, e);
        }
        self.ctx
            .logs
            .info(LogCategory::Bot, format!("bot {} stopped", bot_id));
    }

    /// Start if stopped, stop if running. Returns the new running state.
    pub async fn toggle(self: &Arc<Self>, bot_id: &str) -> anyhow::Result<bool> {
        if self.is_worker_active(bot_id).await {
            self.stop(bot_id).await;
            Ok(false)
        } else {
            self.start(bot_id).await?;
            Ok(true)
        }
    }

    /// Persists new config. Restarts the worker only when the token changed;
    /// everything else hot-reloads because the pipeline re-reads the row on
    /// every message. Returns whether a restart happened.
    pub async fn update_config(
        self: &Arc<Self>,
        bot_id: &str,
        input: &BotInput,
    ) -> anyhow::Result<bool> {
        let old = self
            .ctx
            .store
            .get_bot(bot_id)?
            .ok_or_else(|| anyhow::anyhow!("Бот не найден"))?;

        if !self.ctx.store.update_bot(bot_id, input)? {
            anyhow::bail!("Бот не найден");
        }

        let running = self.is_worker_active(bot_id).await;
        if running && old.token != input.token {
            info!("token changed for running bot {}, restarting", bot_id);
            self.stop(bot_id).await;
            self.start(bot_id).await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// One-shot `getMe`, persisted.
    pub async fn refresh_info(&self, bot_id: &str) -> anyhow::Result<serde_json::Value> {
        let row = self
            .ctx
            .store
            .get_bot(bot_id)?
            .ok_or_else(|| anyhow::anyhow!("Бот не найден"))?;

        let bot = Bot::new(row.token);
        let me = bot.get_me().await?;
        let user = me.user.clone();

        self.ctx.store.set_telegram_info(
            bot_id,
            user.username.as_deref(),
            &user.first_name,
            user.id.0 as i64,
        )?;

        Ok(serde_json::json!({
            "username": user.username,
            "firstName": user.first_name,
            "botId": user.id.0,
        }))
    }

    /// Stop if running, then delete the row (cascades to commands/history).
    pub async fn delete(&self, bot_id: &str) -> anyhow::Result<bool> {
        if self.is_worker_active(bot_id).await {
            self.stop(bot_id).await;
        }
        Ok(self.ctx.store.delete_bot(bot_id)?)
    }

    /// Starts every bot the operator left active. Failures are logged, not
    /// fatal: one broken token must not keep the fleet down.
    pub async fn restore_active_bots(self: &Arc<Self>) {
        let ids = match self.ctx.store.active_bot_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!("failed to list active bots: {}", e);
                return;
            }
        };

        for id in ids {
            if let Err(e) = self.start(&id).await {
                self.ctx.logs.error(
                    LogCategory::Bot,
                    format!("failed to restore bot {}: {}", id, e),
                );
            }
        }
    }

    /// One reconciler pass: rows claiming to run without a live worker get
    /// their flag cleared.
    pub async fn reconcile_once(&self) {
        let marked = match self.ctx.store.ids_marked_running() {
            Ok(ids) => ids,
            Err(e) => {
                warn!("reconciler store read failed: {}", e);
                return;
            }
        };

        for id in marked {
            if !self.is_worker_active(&id).await {
                if let Err(e) = self.ctx.store.set_running(&id, false) {
                    warn!("reconciler flag repair failed for {}: {}", id, e);
                    continue;
                }
                self.ctx.logs.warning(
                    LogCategory::Bot,
                    format!("reconciler: bot {} had no worker, flag repaired", id),
                );
            }
        }
    }

    pub fn spawn_reconciler(self: &Arc<Self>) -> JoinHandle<()> {
        let sup = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);
            ticker.tick().await; // immediate first tick, skip it
            loop {
                ticker.tick().await;
                sup.reconcile_once().await;
            }
        })
    }

    /// Graceful shutdown: signal every worker in parallel, wait briefly,
    /// clear all multi-command contexts.
    pub async fn shutdown(&self) {
        let handles: Vec<(String, WorkerHandle)> =
            self.workers.write().await.drain().collect();

        let mut joins = Vec::new();
        for (bot_id, handle) in handles {
            let _ = handle.shutdown.send(true);
            if let Err(e) = self.ctx.store.set_running(&bot_id, false) {
                warn!("failed to clear running flag for {}: {}", bot_id, e);
            }
            joins.push(handle.join);
        }

        for mut join in joins {
            if tokio::time::timeout(Duration::from_secs(2), &mut join)
                .await
                .is_err()
            {
                join.abort();
            }
        }

        self.ctx.registry.clear_all();
        self.ctx
            .logs
            .info(LogCategory::Server, "all bot workers stopped");
    }

    /// Removes a worker entry without joining it; used by a worker tearing
    /// itself down from inside its own task.
    async fn force_remove(&self, bot_id: &str) {
        self.workers.write().await.remove(bot_id);
    }
}

async fn poll_loop(
    sup: Arc<Supervisor>,
    ctx: Arc<AppContext>,
    bot: Bot,
    bot_id: String,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut offset: i32 = 0;
    info!("polling started for bot {}", bot_id);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                break;
            }
            result = bot.get_updates().offset(offset).timeout(POLL_TIMEOUT_SECS).send() => {
                match result {
                    Ok(updates) => {
                        for update in updates {
                            offset = update.id.0 as i32 + 1;
                            match update.kind {
                                UpdateKind::Message(msg) => {
                                    pipeline::handle_message(&ctx, &sup, &bot, &bot_id, &msg).await;
                                }
                                UpdateKind::CallbackQuery(query) => {
                                    pipeline::handle_callback(&ctx, &sup, &bot, &bot_id, &query)
                                        .await;
                                }
                                _ => {}
                            }
                        }
                    }
                    Err(RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
                        // Another process polls the same token. Stand down and
                        // leave restart to the operator.
                        ctx.logs.warning(
                            LogCategory::Telegram,
                            format!(
                                "conflict 409 for bot {}: another process is polling this token",
                                bot_id
                            ),
                        );
                        if let Err(e) = ctx.store.set_running(&bot_id, false) {
                            warn!("failed to clear running flag for {}: {}", bot_id, e);
                        }
                        sup.force_remove(&bot_id).await;
                        break;
                    }
                    Err(e) => {
                        ctx.logs.error(
                            LogCategory::Telegram,
                            format!("polling error for bot {}: {}", bot_id, e),
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    info!("polling ended for bot {}", bot_id);
}
