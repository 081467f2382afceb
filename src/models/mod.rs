// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod coordinate;
pub mod ride;
pub mod route;
pub mod scooter;
pub mod user;

pub use coordinate::{Coordinate, PositionSample};
pub use ride::{Ride, RideCompletion, RideRoute, RideRow};
pub use route::Route;
pub use scooter::Scooter;
pub use user::UserId;
