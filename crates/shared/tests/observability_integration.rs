//! 可观测性与配置加载集成测试

use std::collections::HashMap;

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use biofox_shared::observability::metrics::{
        record_commission_calculation, record_device_sale, record_http_request,
        record_notification_created, record_order_created, set_worker_last_run,
    };

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/api/orders", 200, 0.05);
        record_http_request("POST", "/api/device-sales", 201, 0.12);
        record_http_request("PUT", "/api/orders/{id}", 200, 0.08);
        record_http_request("DELETE", "/api/clinical-cases/{id}", 204, 0.03);
        record_http_request("GET", "/api/not-found", 404, 0.01);
    }

    #[test]
    fn test_record_business_metrics() {
        record_order_created(true);
        record_device_sale("tier_5_plus", 2);
        record_device_sale("tier_1_4", -1);
        record_commission_calculation("skipped_paid", 0);
        record_notification_created("commission_paid");
        set_worker_last_run("commission", 0.0);
    }
}

// ============================================================================
// 追踪上下文测试
// ============================================================================

mod tracing_tests {
    use super::*;
    use biofox_shared::observability::tracing::extract_from_headers;
    use opentelemetry::trace::TraceContextExt;

    #[test]
    fn test_extract_with_tracestate() {
        let mut headers = HashMap::new();
        headers.insert(
            "traceparent".to_string(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
        );
        headers.insert("tracestate".to_string(), "vendor=biofox".to_string());

        let context = extract_from_headers(&headers);
        let span_context = context.span().span_context().clone();
        assert!(span_context.is_valid());
        assert_eq!(span_context.trace_state().get("vendor"), Some("biofox"));
    }

    #[test]
    fn test_extract_from_malformed_traceparent() {
        let mut headers = HashMap::new();
        headers.insert("traceparent".to_string(), "not-a-traceparent".to_string());

        let context = extract_from_headers(&headers);
        assert!(!context.span().span_context().is_valid());
    }
}

// ============================================================================
// 配置加载测试
// ============================================================================

mod config_tests {
    use biofox_shared::config::AppConfig;

    #[test]
    fn test_load_layers_files_and_env() {
        let dir = std::env::temp_dir().join(format!("biofox-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("default.toml"),
            "[server]\nport = 9000\n\n[commission]\nschedule_cron = \"0 30 2 1 * *\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("biofox-admin-service.toml"),
            "[redis]\ndashboard_ttl_secs = 120\n",
        )
        .unwrap();

        // SAFETY: 本测试文件中只有这一个用例修改环境变量
        unsafe {
            std::env::set_var("CONFIG_DIR", &dir);
            std::env::set_var("BIOFOX_DATABASE__MAX_CONNECTIONS", "42");
        }

        let config = AppConfig::load("biofox-admin-service").unwrap();

        unsafe {
            std::env::remove_var("CONFIG_DIR");
            std::env::remove_var("BIOFOX_DATABASE__MAX_CONNECTIONS");
        }
        let _ = std::fs::remove_dir_all(&dir);

        assert_eq!(config.service_name, "biofox-admin-service");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.commission.schedule_cron, "0 30 2 1 * *");
        assert_eq!(config.redis.dashboard_ttl_secs, 120);
        assert_eq!(config.database.max_connections, 42);
        // 未配置的字段回落到默认值
        assert_eq!(config.database.min_connections, 2);
    }
}
