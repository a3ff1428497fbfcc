/*
 * This file is part of fscd.
 *
 * Copyright (C) 2025 fscd contributors
 *
 * fscd is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * fscd is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with fscd. If not, see <https://www.gnu.org/licenses/>.
 */

//! fscd - fan speed control daemon
//!
//! Loads the JSON configuration, builds the zones of `fsc-core` and drives
//! them from a polling loop.

pub mod config;
pub mod logger;
pub mod service;
