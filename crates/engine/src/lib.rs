//! # Viitjee Engine
//!
//! Client-side data layer for the viitjee backend. It resolves a single
//! connection to the backend lazily and runs remote calls through a keyed,
//! deduplicated query cache whose fetches are gated on that connection.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use viitjee_api::{ActorConfig, HttpActorResolver};
//! use viitjee_engine::{ConnectionProvider, GreetingQuery, QueryClient};
//!
//! # async fn demo() -> Result<(), viitjee_engine::QueryError> {
//! let client = QueryClient::default();
//! let connection = ConnectionProvider::new(Arc::new(HttpActorResolver::new(ActorConfig::default())));
//! connection.start();
//!
//! let mut greeting = GreetingQuery::new(&client, &connection, "Alice");
//! let result = greeting.settled().await?;
//! println!("{:?}", result.data);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`connection`**: [`ConnectionProvider`] owning the backend handle
//! - **`query`**: [`QueryClient`] cache and [`QueryObserver`] subscriptions
//! - **`greeting`**: the greeting query bound to the connection

pub mod connection;
mod error;
pub mod greeting;
pub mod query;

pub use connection::{ConnectionProvider, ConnectionState};
pub use error::QueryError;
pub use greeting::{DEFAULT_GREETING_NAME, GREETING_OPERATION, GreetingQuery, greeting_key};
pub use query::{QueryClient, QueryClientConfig, QueryFn, QueryObserver, QueryOptions, query_fn};
pub use viitjee_types::{ConnectionPresence, QueryKey, QueryResult, QueryStatus};
