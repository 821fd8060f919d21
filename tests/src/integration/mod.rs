//! Cross-component flows.

#[cfg(test)]
mod fixtures;

mod bootstrap;
mod bus;
mod dispatch;
mod lifecycle;
mod trust_upgrade;
