#![deny(rust_2018_idioms)]

#[macro_use]
extern crate smallvec;

#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

#[cfg(test)]
#[macro_use]
extern crate indexmap;

#[macro_use]
extern crate bitflags;

#[macro_use]
extern crate anyhow;

#[macro_use]
extern crate log;

#[macro_use]
mod macros;

#[cfg(test)]
pub mod test_utils;

pub mod checksum;
pub mod client;
pub mod conn;
pub mod dispatch;
pub mod editor;
pub mod error;
pub mod item;
pub mod path;
pub mod repo;
pub mod serve;
pub mod tuple;
pub mod txn;
pub mod update;
