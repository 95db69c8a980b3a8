// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 数据源抽取器
///
/// 每种任务类型对应一个实现了 `Extractor` 的变体，共享 `html` 中的解析辅助函数
mod html;

pub mod generic_website;
pub mod professional_network;
pub mod search_listing;

pub use generic_website::GenericWebsiteExtractor;
pub use professional_network::ProfessionalNetworkExtractor;
pub use search_listing::SearchListingExtractor;
