// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod cross_job_dedup_test;
pub mod generic_website_job_test;
pub mod helpers;
pub mod pipeline_test;
pub mod search_listing_job_test;
