/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Block propagation: shredding blocks and reassembling them from shreds.
//!
//! A leader cuts its block into FEC sets of `data_shred_count` data shreds, and adds
//! `parity_shred_count` Reed–Solomon parity shreds to every set ([`erasure::Shredder`]). Receivers feed
//! every shred they get into a [`resolver::FecResolver`], which recovers a set as soon as any
//! `data_shred_count` of its shreds have arrived, whatever their kind and order.
//!
//! Network threads share one resolver through [`ingest::ShredIngest`], which hands completed sets to
//! the consensus thread.

pub mod erasure;

pub mod fec_set;

pub mod ingest;

pub mod resolver;

pub mod shred;
