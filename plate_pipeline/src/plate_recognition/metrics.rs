use lazy_static::lazy_static;
use prometheus::{register_int_counter, IntCounter};

lazy_static! {
    pub static ref FRAMES_READ: IntCounter = register_int_counter!(
        "plate_pipeline_frames_read_total",
        "Frames read from the source"
    )
    .expect("register frames_read");
    pub static ref FRAMES_DROPPED: IntCounter = register_int_counter!(
        "plate_pipeline_frames_dropped_total",
        "Frames dropped from the full backlog"
    )
    .expect("register frames_dropped");
    pub static ref WORKER_RESTARTS: IntCounter = register_int_counter!(
        "plate_pipeline_worker_restarts_total",
        "Workers restarted after a missed report"
    )
    .expect("register worker_restarts");
    pub static ref CANDIDATES_SHED: IntCounter = register_int_counter!(
        "plate_pipeline_candidates_shed_total",
        "Candidates dropped because every tracker worker was saturated"
    )
    .expect("register candidates_shed");
    pub static ref PLATES_PUBLISHED: IntCounter = register_int_counter!(
        "plate_pipeline_plates_published_total",
        "Consensus readings delivered to the result sink"
    )
    .expect("register plates_published");
}
