use std::net::SocketAddr;

pub const ORDERS_PLACED: &str = "bazaar_orders_placed_total";
pub const CHAT_MESSAGES: &str = "bazaar_chat_messages_total";
pub const PRODUCTS_CREATED: &str = "bazaar_products_created_total";
pub const LOGINS: &str = "bazaar_logins_total";
pub const HUB_EVENTS_DROPPED: &str = "bazaar_hub_events_dropped_total";

pub fn init_metrics(port: u16) {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(%addr, "Prometheus exporter listening on /metrics"),
        Err(e) => tracing::warn!(error = %e, "Prometheus exporter install failed (possibly already installed)"),
    }
}

pub fn order_placed(payment: &'static str) {
    metrics::counter!(ORDERS_PLACED, "payment" => payment).increment(1);
}

pub fn chat_message_sent() {
    metrics::counter!(CHAT_MESSAGES).increment(1);
}

pub fn product_created() {
    metrics::counter!(PRODUCTS_CREATED).increment(1);
}

pub fn login(outcome: &'static str) {
    metrics::counter!(LOGINS, "outcome" => outcome).increment(1);
}

pub fn hub_events_dropped(count: u64) {
    metrics::counter!(HUB_EVENTS_DROPPED).increment(count);
}
