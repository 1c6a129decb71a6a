/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types common across the replication pipeline.
//!
//! The types defined in [`basic`] are "inert": they are sent around and inspected, but have no
//! active behavior. They follow the newtype pattern, and the API for using them is defined here.
//! Cryptographic primitives and their convenience wrappers live in [`crypto_primitives`].

pub mod basic;

pub mod crypto_primitives;
