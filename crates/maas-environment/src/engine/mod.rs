// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container engine implementations.
//!
//! The [`ContainerEngine`] trait abstracts the Docker verbs the lifecycle
//! service needs. [`DockerEngine`] shells out through the process invoker;
//! [`MockEngine`] simulates containers for tests.

mod docker;
mod mock;
mod traits;

pub use docker::DockerEngine;
pub use mock::MockEngine;
pub use traits::ContainerEngine;
