//! Registry tests — registration, dispatch mapping, and the concurrency
//! guarantees around handler lifetime.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use wsrpc_server::{App, Packet};

    #[test]
    fn default_app_has_echo() {
        let app = App::default();
        assert_eq!(app.len(), 1);
        assert!(app.contains("echo"));
    }

    #[test]
    fn echo_returns_params_unchanged() {
        let app = App::default();
        for params in [r#"{"a": 1,  "b": [2]}"#, "null", "0", "\"s\""] {
            let pkg = app.dispatch("echo", params).unwrap();
            assert_eq!(pkg.json, params);
            assert!(pkg.attachments.is_empty());
        }
    }

    #[test]
    fn register_replace_unregister() {
        let app = App::default();

        app.register("test_method", |_| {
            Ok(Packet::new(r#"{"result": "success"}"#, Vec::new()))
        });
        assert_eq!(app.len(), 2);
        assert!(app.contains("test_method"));

        // Same name replaces.
        app.register("test_method", |_| {
            Ok(Packet::new(r#"{"result": "updated"}"#, Vec::new()))
        });
        assert_eq!(app.len(), 2);
        let pkg = app.dispatch("test_method", "{}").unwrap();
        assert_eq!(pkg.json, r#"{"result": "updated"}"#);

        app.unregister("test_method");
        assert_eq!(app.len(), 1);
    }

    #[test]
    fn dispatch_unknown_method() {
        let app = App::default();
        let err = app.dispatch("nonexistent_method", "{}").unwrap_err();
        assert_eq!(err, "Method Unavaiable : \"nonexistent_method\"");
    }

    #[test]
    fn dispatch_panicking_handler() {
        let app = App::default();
        app.register("throwing_method", |_| panic!("test panic"));
        let err = app.dispatch("throwing_method", "{}").unwrap_err();
        assert_eq!(err, "Internal Error : \"throwing_method\"");

        // The app stays functional afterwards.
        assert!(app.dispatch("echo", "{}").is_ok());
    }

    #[test]
    fn handler_error_string_passes_through_verbatim() {
        let app = App::default();
        app.register("failing", |_| Err("disk on fire".to_owned()));
        let err = app.dispatch("failing", "{}").unwrap_err();
        assert_eq!(err, "disk on fire");
    }

    #[test]
    fn handler_receives_raw_params() {
        let app = App::default();
        app.register("probe", |params| {
            assert_eq!(params, r#"{"key":  "value"}"#);
            Ok(Packet::new("true", Vec::new()))
        });
        app.dispatch("probe", r#"{"key":  "value"}"#).unwrap();
    }

    #[test]
    fn handler_may_own_unique_resources() {
        // A handler capturing a non-Clone value must still be
        // registrable and invokable.
        let owned = Box::new(41_u64);
        let app = App::default();
        app.register("owned", move |_| {
            Ok(Packet::new(format!("{}", *owned + 1), Vec::new()))
        });
        assert_eq!(app.dispatch("owned", "null").unwrap().json, "42");
    }

    #[test]
    fn in_flight_handler_survives_unregister() {
        let app = Arc::new(App::default());
        let entered = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        {
            let entered = entered.clone();
            let finished = finished.clone();
            app.register("slow", move |_| {
                entered.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(100));
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(Packet::new("\"done\"", Vec::new()))
            });
        }

        let caller = {
            let app = app.clone();
            thread::spawn(move || app.dispatch("slow", "{}"))
        };

        // Wait for the call to start, then rip the handler out.
        while entered.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        app.unregister("slow");
        assert!(!app.contains("slow"));

        let result = caller.join().unwrap();
        assert_eq!(result.unwrap().json, "\"done\"");
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn replace_during_call_keeps_old_handler_for_that_call() {
        let app = Arc::new(App::default());
        let entered = Arc::new(AtomicUsize::new(0));

        {
            let entered = entered.clone();
            app.register("swap", move |_| {
                entered.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                Ok(Packet::new("\"old\"", Vec::new()))
            });
        }

        let caller = {
            let app = app.clone();
            thread::spawn(move || app.dispatch("swap", "{}"))
        };
        while entered.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        app.register("swap", |_| Ok(Packet::new("\"new\"", Vec::new())));

        assert_eq!(caller.join().unwrap().unwrap().json, "\"old\"");
        assert_eq!(app.dispatch("swap", "{}").unwrap().json, "\"new\"");
    }

    #[test]
    fn concurrent_registry_churn() {
        let app = Arc::new(App::default());
        app.register("initial_method", |_| {
            Ok(Packet::new(r#"{"result": "initial"}"#, Vec::new()))
        });

        let threads = thread::available_parallelism().map_or(4, usize::from).min(8);
        let ops_per_thread = 100;
        let dispatched = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let app = app.clone();
                let dispatched = dispatched.clone();
                thread::spawn(move || {
                    for i in 0..ops_per_thread {
                        match i % 10 {
                            0..=2 => {
                                let name = format!("method_{t}_{i}");
                                app.register(name, |_| {
                                    Ok(Packet::new(r#"{"result": "registered"}"#, Vec::new()))
                                });
                            }
                            3..=4 => {
                                let name = format!("method_{t}_{}", i / 2);
                                app.unregister(&name);
                            }
                            _ => {
                                let name = if i % 2 == 0 {
                                    "initial_method"
                                } else {
                                    "nonexistent_method"
                                };
                                let _ = app.dispatch(name, "{}");
                                dispatched.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(dispatched.load(Ordering::SeqCst) > 0);
        assert!(app.dispatch("initial_method", "{}").is_ok());
    }

    #[test]
    fn concurrent_dispatch_same_method() {
        let app = Arc::new(App::default());
        app.register("slow_method", |_| {
            thread::sleep(Duration::from_millis(2));
            Ok(Packet::new(r#"{"result": "slow"}"#, Vec::new()))
        });

        let threads = thread::available_parallelism().map_or(4, usize::from).min(8);
        let ops_per_thread = 25;
        let succeeded = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let app = app.clone();
                let succeeded = succeeded.clone();
                thread::spawn(move || {
                    for _ in 0..ops_per_thread {
                        if app.dispatch("slow_method", "{}").is_ok() {
                            succeeded.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(succeeded.load(Ordering::SeqCst), threads * ops_per_thread);
    }
}
