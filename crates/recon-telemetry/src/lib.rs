// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod analytics;
pub mod bounded_store;
pub mod config;
pub mod error;
pub mod http_utils;
pub mod intake_queue;
pub mod message;
pub mod otlp_decoder;
pub mod telemetry_server;
pub mod telemetry_worker;
