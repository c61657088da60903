
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_shutdown_phases() {
        let controller = ShutdownController::new();
        assert_eq!(controller.phase(), ShutdownPhase::Running);
        assert!(!controller.is_shutting_down());

        controller.shutdown().await;

        assert_eq!(controller.phase(), ShutdownPhase::Terminated);
        assert!(controller.is_shutting_down());
    }

    #[tokio::test]
    async fn test_connection_guard() {
        let controller = ShutdownController::new();
        assert_eq!(controller.active_connections(), 0);

        {
            let _guard1 = controller.track_connection();
            let _guard2 = controller.track_connection();
            assert_eq!(controller.active_connections(), 2);
        }

        assert_eq!(controller.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_drain_runs_before_cancellation() {
        let controller = ShutdownController::new();
        let token = controller.token();
        let observed = Arc::new(AtomicBool::new(true));

        let observed_in_drain = observed.clone();
        let token_in_drain = token.clone();
        controller
            .shutdown_with(async move {
                observed_in_drain.store(token_in_drain.is_cancelled(), Ordering::SeqCst);
            })
            .await;

        assert!(!observed.load(Ordering::SeqCst));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_waits_for_connections_to_close() {
        let controller = ShutdownController::new();
        let guard = controller.track_connection();
        let token = controller.token();

        let conn = tokio::spawn(async move {
            token.cancelled().await;
            drop(guard);
        });

        controller.shutdown().await;
        conn.await.unwrap();
        assert_eq!(controller.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_timeout_abandons_stuck_connections() {
        let controller = ShutdownController::with_timeout(Duration::from_millis(100));
        let _stuck = controller.track_connection();

        controller.shutdown().await;

        assert_eq!(controller.phase(), ShutdownPhase::Terminated);
        assert_eq!(controller.active_connections(), 1);
    }

    #[tokio::test]
    async fn test_double_shutdown_runs_drain_once() {
        let controller = ShutdownController::new();
        let drains = Arc::new(AtomicUsize::new(0));

        let (a, b) = (drains.clone(), drains.clone());
        let (c1, c2) = (controller.clone(), controller.clone());
        let h1 = tokio::spawn(async move {
            c1.shutdown_with(async move {
                a.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        });
        let h2 = tokio::spawn(async move {
            c2.shutdown_with(async move {
                b.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        });
        let _ = tokio::join!(h1, h2);

        assert_eq!(drains.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_phase_subscription() {
        let controller = ShutdownController::new();
        let mut rx = controller.subscribe();

        controller.shutdown().await;

        assert_eq!(rx.recv().await.unwrap(), ShutdownPhase::Draining);
        assert_eq!(rx.recv().await.unwrap(), ShutdownPhase::Stopping);
        assert_eq!(rx.recv().await.unwrap(), ShutdownPhase::Terminated);
    }
