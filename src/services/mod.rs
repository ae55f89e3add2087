//! Domain services. Each service owns a use case slice, depends on the
//! repository traits only, and publishes events after the repository has
//! committed the mutation. A failed publish is logged and never fails or
//! retries the already-committed operation.

pub mod count;
pub mod lot;
pub mod reservation;
pub mod stock;

pub use count::InventoryCountService;
pub use lot::LotService;
pub use reservation::ReservationService;
pub use stock::StockService;
