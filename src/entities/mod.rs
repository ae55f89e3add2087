pub mod inventory_count;
pub mod inventory_count_line_item;
pub mod lot;
pub mod sequence;
pub mod stock;
pub mod stock_movement;
pub mod stock_reservation;
