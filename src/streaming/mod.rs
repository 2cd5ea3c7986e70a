// ABOUTME: Streaming interaction engine module
// ABOUTME: State machine, caller events, context assembly and the engine itself
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

//! # Streaming Interactions
//!
//! One interaction extends a discussion with a generated reply:
//!
//! 1. `Idle -> ContextLoaded`: read the branch (through the response cache)
//! 2. `ContextLoaded -> Generating`: open the provider stream and forward chunks
//! 3. `Generating -> Finalizing`: persist the reply and its generation detail atomically
//! 4. `Finalizing -> Completed`
//!
//! Cancellation, an expired deadline or a provider error move the interaction
//! to `Aborted` and persist nothing. A consumer dropped before `Finalizing`
//! aborts too; once `Finalizing` begins the commit runs to the end on its own
//! task. After the first completed reply of an untitled discussion the engine
//! names it (see [`title`]).
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use tokio_util::sync::CancellationToken;
//! use threadline::streaming::{InteractionEngine, InteractionRequest, StreamEvent};
//! # async fn example(engine: InteractionEngine) -> Result<(), threadline::errors::AppError> {
//! let request = InteractionRequest::new("d1").with_user_message("Tell me more");
//! let mut interaction = engine.start(request, CancellationToken::new()).await?;
//! while let Some(event) = interaction.next().await {
//!     if let StreamEvent::Chunk { delta } = &event {
//!         print!("{delta}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Provider prompt assembly
pub mod context;
mod engine;
mod events;
/// Interaction lifecycle
pub mod state;
/// Titles for unnamed discussions
pub mod title;

pub use engine::{EventStream, Interaction, InteractionEngine, InteractionRequest};
pub use events::StreamEvent;
pub use state::InteractionState;
