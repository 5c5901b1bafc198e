// src/scheduler.rs - The single cooperative loop driving the controller
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};

use crate::gateway::CommandGateway;
use crate::hardware::{CutterActuator, MotionDriver};
use crate::job::JobController;
use crate::web::controller_channel::ControllerRequest;

/// Apply everything waiting on the channel, oldest first. Returns the number of requests.
pub fn service_pending<M: MotionDriver, C: CutterActuator>(
    gateway: &mut CommandGateway,
    controller: &mut JobController<M, C>,
    requests: &mut mpsc::Receiver<ControllerRequest>,
    now: Instant,
) -> usize {
    gateway.flush(controller, now);
    let mut serviced = 0;
    while let Ok(request) = requests.try_recv() {
        gateway.service(controller, request, now);
        serviced += 1;
    }
    serviced
}

/// Run until `shutdown` fires: each tick services pending requests, then ticks the
/// controller once. Returns the parked controller.
pub async fn run_control_loop<M: MotionDriver, C: CutterActuator>(
    mut controller: JobController<M, C>,
    mut requests: mpsc::Receiver<ControllerRequest>,
    tick: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JobController<M, C> {
    let mut gateway = CommandGateway::new();
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tracing::info!("Control loop running every {:?}", tick);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Control loop shutting down");
                break;
            }
            _ = interval.tick() => {
                let now = Instant::now();
                service_pending(&mut gateway, &mut controller, &mut requests, now);
                controller.tick(now);
                // A stroke that just ended releases anything queued behind it.
                gateway.flush(&mut controller, now);
            }
        }
    }
    if gateway.pending() > 0 {
        tracing::warn!("Dropping {} deferred commands at shutdown", gateway.pending());
    }
    controller.park();
    controller
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Command;
    use crate::hardware::{SimServo, SimStepper};
    use crate::job::{BatchRequest, CutProfile, FeedSettings, JobPhase};
    use tokio::sync::oneshot;

    fn controller() -> JobController<SimStepper, SimServo> {
        JobController::new(
            SimStepper::new(50_000.0, 500_000.0),
            SimServo::new(0),
            10.0,
            FeedSettings {
                max_speed: 50_000.0,
                settle: Duration::from_millis(1),
            },
            CutProfile {
                close_step: 65,
                open_step: 65,
                close_step_delay: Duration::from_millis(1),
                hold: Duration::from_millis(1),
                open_step_delay: Duration::from_millis(1),
                ..CutProfile::default()
            },
        )
    }

    #[test]
    fn test_service_pending_drains_in_order() {
        let mut c = controller();
        let mut gateway = CommandGateway::new();
        let (tx, mut rx) = mpsc::channel(8);
        let (start_tx, mut start_rx) = oneshot::channel();
        let (stop_tx, mut stop_rx) = oneshot::channel();
        tx.try_send(ControllerRequest::Action {
            command: Command::Start(BatchRequest::clamped(2.0, 3, 100)),
            respond_to: start_tx,
        })
        .unwrap();
        tx.try_send(ControllerRequest::Action {
            command: Command::Stop,
            respond_to: stop_tx,
        })
        .unwrap();
        let n = service_pending(&mut gateway, &mut c, &mut rx, Instant::now());
        assert_eq!(n, 2);
        assert_eq!(start_rx.try_recv().unwrap().status.as_deref(), Some("started"));
        assert_eq!(stop_rx.try_recv().unwrap().status.as_deref(), Some("stop_requested"));
        assert_eq!(c.phase(), JobPhase::Feeding);
        assert_eq!(c.state().pieces_remaining, 0);
    }

    #[test]
    fn test_start_deferred_behind_stroke_is_answered_after_it() {
        let mut c = controller();
        let mut gateway = CommandGateway::new();
        let (tx, mut rx) = mpsc::channel(8);
        let mut now = Instant::now();
        c.start(BatchRequest::clamped(1.0, 2, 100), now).unwrap();
        while c.phase() != JobPhase::Cutting {
            now += Duration::from_micros(100);
            c.tick(now);
        }

        let (start_tx, mut start_rx) = oneshot::channel();
        tx.try_send(ControllerRequest::Action {
            command: Command::Start(BatchRequest::clamped(3.0, 1, 100)),
            respond_to: start_tx,
        })
        .unwrap();
        assert_eq!(service_pending(&mut gateway, &mut c, &mut rx, now), 1);
        assert!(start_rx.try_recv().is_err());
        assert_eq!(gateway.pending(), 1);

        // Same order as one pass of the control loop.
        let mut passes = 0;
        let reply = loop {
            now += Duration::from_micros(100);
            service_pending(&mut gateway, &mut c, &mut rx, now);
            let stroke_before = c.stroke_in_progress();
            c.tick(now);
            gateway.flush(&mut c, now);
            if let Ok(reply) = start_rx.try_recv() {
                assert!(stroke_before, "reply arrived before the stroke ended");
                assert!(!c.stroke_in_progress());
                break reply;
            }
            passes += 1;
            assert!(passes < 100_000, "deferred start never answered");
        };
        assert_eq!(reply.status.as_deref(), Some("started"));
        assert_eq!(reply.length, Some(3.0));
        assert_eq!(c.phase(), JobPhase::Feeding);
        assert_eq!(c.state().piece_target_steps, 30);
    }

    #[tokio::test]
    async fn test_control_loop_runs_batch_and_parks() {
        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_control_loop(
            controller(),
            rx,
            Duration::from_micros(200),
            shutdown_rx,
        ));

        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send(ControllerRequest::Action {
            command: Command::Start(BatchRequest::clamped(1.0, 2, 100)),
            respond_to: resp_tx,
        })
        .await
        .unwrap();
        assert!(resp_rx.await.unwrap().ok);

        let mut finished = false;
        for _ in 0..500 {
            tokio::time::sleep(Duration::from_millis(2)).await;
            let (status_tx, status_rx) = oneshot::channel();
            tx.send(ControllerRequest::GetStatus { respond_to: status_tx })
                .await
                .unwrap();
            let status = status_rx.await.unwrap();
            if !status.job_running {
                assert_eq!(status.current_piece, 2);
                assert_eq!(status.remaining, 0);
                finished = true;
                break;
            }
        }
        assert!(finished, "batch did not finish");

        shutdown_tx.send(()).unwrap();
        let parked = handle.await.unwrap();
        assert!(!parked.motion().outputs_enabled());
        assert_eq!(parked.phase(), JobPhase::Idle);
    }
}
