pub mod hrv;
pub mod outliers;
pub mod quality;
