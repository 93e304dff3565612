pub mod promo_reader;
pub mod report_writer;
