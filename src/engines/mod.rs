// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod extractors;
pub mod factory;
pub mod http_fetcher;
pub mod proxy_manager;
pub mod rate_limiter;
pub mod traits;
