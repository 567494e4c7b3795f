use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::predictor::Predictor;

pub struct AppState {
    pub predictor: Arc<Predictor>,
    /// A single permit: the predictor serves one request at a time.
    pub worker: Arc<Semaphore>,
}

impl AppState {
    pub fn new(predictor: Predictor) -> Self {
        Self {
            predictor: Arc::new(predictor),
            worker: Arc::new(Semaphore::new(1)),
        }
    }
}
