//! # Protocol Engine Test Suite
//!
//! End-to-end flows of the protocol manager over in-memory adapters: memory
//! store, loopback channel sender, in-memory contact directory, scripted step
//! engine, seeded PRNG and manual clock.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── fixtures.rs      # Shared engine harness
//!     ├── dispatch.rs      # Serial execution, backlog drain, cancel handling
//!     ├── lifecycle.rs     # Abort cascade, normal termination
//!     ├── trust_upgrade.rs # Waiting instances and OneToOne resumption
//!     ├── bootstrap.rs     # Startup sweeps, restart
//!     └── bus.rs           # Event bus round trips through the runtime router
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p protocol-tests
//! cargo test -p protocol-tests integration::trust_upgrade::
//! ```

pub mod integration;
