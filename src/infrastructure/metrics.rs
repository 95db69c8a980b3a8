// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

/// 安装 Prometheus 记录器并在指定地址暴露 `/metrics`
///
/// 地址被占用等安装失败只记录警告，指标调用在没有记录器时为空操作。
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new();

    if let Err(e) = builder.with_http_listener(addr).install() {
        warn!(
            "Failed to install Prometheus recorder: {}. This might happen if the port is already in use.",
            e
        );
        return;
    }

    info!("Metrics exporter listening on {}", addr);
}
