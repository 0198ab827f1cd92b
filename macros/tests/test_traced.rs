#[cfg(test)]
mod tests {
    use pilo_macros::test_traced;
    use tracing::{debug, error, info, trace};

    #[test_traced("INFO")]
    fn test_info_level() {
        info!("This is an info log");
        debug!("This is a debug log (won't be shown)");
        assert_eq!(2 + 2, 4);
    }

    #[test_traced]
    fn test_default_level() {
        debug!("This is a debug log");
        assert_eq!(3 * 3, 9);
    }

    #[test_traced("error")]
    fn test_lowercase_level() {
        error!("This is an error log");
        assert_eq!(5 * 2, 10);
    }

    #[test_traced("TRACE")]
    fn test_returns_body_value() {
        trace!(hops = 3, "walking path");
        let hops: Vec<u32> = (0..3).collect();
        assert_eq!(hops.len(), 3);
    }

    #[test_traced("WARN")]
    #[should_panic(expected = "boom")]
    fn test_panics_propagate() {
        panic!("boom");
    }
}
