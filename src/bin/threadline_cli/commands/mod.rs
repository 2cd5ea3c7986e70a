// ABOUTME: Command modules for threadline-cli and the shared runtime context
// ABOUTME: Wires the store, response cache, provider and engine from ServerConfig
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

pub mod discussion;
pub mod owner;

use std::sync::Arc;

use threadline::cache::ResponseCache;
use threadline::config::ServerConfig;
use threadline::database::{Database, DiscussionManager};
use threadline::errors::AppResult;
use threadline::llm::OpenAiCompatibleProvider;
use threadline::streaming::InteractionEngine;

/// Everything a command needs
pub struct CliContext {
    pub database: Database,
    pub manager: DiscussionManager,
    pub engine: InteractionEngine,
    cache: ResponseCache,
}

impl CliContext {
    pub async fn connect(config: ServerConfig) -> AppResult<Self> {
        let database = Database::new(&config.database).await?;
        let cache = ResponseCache::new(config.cache)?;
        let manager = DiscussionManager::new(database.clone()).with_cache(cache.clone());
        let provider = Arc::new(OpenAiCompatibleProvider::new(config.provider)?);
        let engine = InteractionEngine::new(manager.clone(), provider, config.streaming);
        Ok(Self {
            database,
            manager,
            engine,
            cache,
        })
    }

    /// Stop the cache sweeper
    pub async fn shutdown(self) {
        self.cache.shutdown().await;
    }
}
