//! In-memory stores for standalone mode and tests.
//!
//! Each store keeps its state behind one `RwLock`, so every operation is
//! atomic with respect to the others.

mod order_store;
mod payment_store;
mod stock_store;

pub use order_store::InMemoryOrderStore;
pub use payment_store::InMemoryPaymentStore;
pub use stock_store::InMemoryStockStore;

use super::{Page, PageRequest};

fn paginate<T: Clone>(matching: Vec<&T>, request: PageRequest) -> Page<T> {
    let total = matching.len() as u64;
    let items = matching
        .into_iter()
        .skip(request.offset() as usize)
        .take(request.size as usize)
        .cloned()
        .collect();
    Page {
        items,
        page: request.page,
        size: request.size,
        total,
    }
}
