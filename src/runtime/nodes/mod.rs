/// One executor per node type

pub mod cart;
pub mod commerce;
pub mod gpt;
pub mod http;
pub mod message;
pub mod payment;
pub mod router;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;
