// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod dates;
pub mod forms;
pub mod model;
pub mod schema;
pub mod state;

pub use dates::*;
pub use forms::*;
pub use model::*;
pub use schema::*;
pub use state::*;
