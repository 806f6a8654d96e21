use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

#[derive(Debug, Clone)]
pub struct Metrics {
    pub registry: Registry,
    pub total_requests: IntCounter,
    pub active_requests: IntGauge,
    pub schema_swaps: IntCounter,
    pub conversion_failures: IntCounter,
    pub registry_errors: IntCounter,
    pub schema_generation: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Metrics> {
        let total_requests =
            IntCounter::with_opts(Opts::new("total_requests", "number of total graphql requests"))?;
        let active_requests =
            IntGauge::with_opts(Opts::new("active_requests", "number of graphql requests in flight"))?;
        let schema_swaps =
            IntCounter::with_opts(Opts::new("schema_swaps", "number of schemas made live"))?;
        let conversion_failures = IntCounter::with_opts(Opts::new(
            "schema_conversion_failures",
            "number of pushed schemas that failed to compile",
        ))?;
        let registry_errors =
            IntCounter::with_opts(Opts::new("registry_errors", "number of registry subscription errors"))?;
        let schema_generation =
            IntGauge::with_opts(Opts::new("schema_generation", "generation of the live schema"))?;

        let registry = Registry::new();
        registry.register(Box::new(total_requests.clone()))?;
        registry.register(Box::new(active_requests.clone()))?;
        registry.register(Box::new(schema_swaps.clone()))?;
        registry.register(Box::new(conversion_failures.clone()))?;
        registry.register(Box::new(registry_errors.clone()))?;
        registry.register(Box::new(schema_generation.clone()))?;

        Ok(Metrics {
            registry,
            total_requests,
            active_requests,
            schema_swaps,
            conversion_failures,
            registry_errors,
            schema_generation,
        })
    }

    pub fn request_started(&self) -> ActiveRequest {
        self.total_requests.inc();
        self.active_requests.inc();
        ActiveRequest {
            gauge: self.active_requests.clone(),
        }
    }

    pub fn schema_swapped(&self, generation: u64) {
        self.schema_swaps.inc();
        self.schema_generation.set(i64::try_from(generation).unwrap_or(i64::MAX));
    }

    pub fn conversion_failed(&self) {
        self.conversion_failures.inc();
    }

    pub fn conversion_failures(&self) -> u64 {
        self.conversion_failures.get()
    }

    pub fn registry_error(&self) {
        self.registry_errors.inc();
    }

    pub fn as_text(&self) -> Option<String> {
        let mut buffer = vec![];
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode(&metric_families, &mut buffer).ok()?;
        String::from_utf8(buffer).ok()
    }
}

/// Decrements the in-flight gauge when the request finishes.
pub struct ActiveRequest {
    gauge: IntGauge,
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_in_flight_requests() {
        let metrics = Metrics::new().unwrap();

        let request = metrics.request_started();
        assert_eq!(metrics.active_requests.get(), 1);
        drop(request);

        assert_eq!(metrics.active_requests.get(), 0);
        assert_eq!(metrics.total_requests.get(), 1);
    }

    #[test]
    fn renders_text_format() {
        let metrics = Metrics::new().unwrap();
        metrics.schema_swapped(4);

        let text = metrics.as_text().unwrap();

        assert!(text.contains("schema_swaps 1"));
        assert!(text.contains("schema_generation 4"));
    }
}
