mod handlers;
mod models;
mod ocr;
mod state;

pub use handlers::{build_router, run_server};
pub use models::{ErrorResponse, OcrRequest};
pub use ocr::{
    CREDITS_EXHAUSTED_MESSAGE, EMPTY_RESULT_MESSAGE, PROCESSING_FAILED_MESSAGE,
    RATE_LIMIT_MESSAGE,
};
pub use state::ServerState;
