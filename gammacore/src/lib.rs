pub mod error;

// data module
pub mod data {
    pub mod channel_range;
    pub mod spectrum;
    pub mod peak;
}

// calibration module
pub mod calibration {
    pub mod estimate;
    pub mod energy;
    pub mod width;
}

// region fit module
pub mod fit {
    pub mod parameters;
    pub mod gaussian;
    pub mod state;
    pub mod vary;
    pub mod residual;
    pub mod optimizer;
    pub mod uncertainty;
    pub mod curve;
    pub mod summary;
    pub mod record;
    pub mod region;
}
