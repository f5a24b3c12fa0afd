#![cfg_attr(docsrs, feature(doc_cfg))]
//#![warn(missing_docs)]

/*!
 # Chunk Batch for Rust

 A chunk-oriented batch engine: jobs made of steps that read items from a
 source, transform them and write them to a sink, committing their progress
 every `chunk_size` items so that a failed or stopped run resumes where it
 left off.

 ## Core Concepts

- **Job:** a flow of steps. Steps run in sequence or branch on the status the previous one ended with.
- **Step:** an independent phase of a job, either chunk oriented or a single repeated `Tasklet`.
- **ItemReader:** hands out input items one at a time and remembers its position for restarts.
- **ItemProcessor:** turns an input item into an output item, or filters it out.
- **ItemWriter:** receives the output of a step one chunk at a time.
- **JobRepository:** persists job and step executions, restart positions included.
- **JobLauncher:** runs a job for a set of parameters, resuming the matching instance if it failed or stopped.

 ## Features

| **Feature**   | **Description**                                               |
|---------------|---------------------------------------------------------------|
| csv           | Enables CSV `ItemReader` and `ItemWriter`                     |
| json          | Enables JSON `ItemReader` and `ItemWriter`                    |
| rdbc-sqlite   | Enables cursor and paging `ItemReader`s and an `ItemWriter` for SQLite |
| logger        | Enables a logger `ItemWriter`, useful for debugging purposes  |
| full          | Enables all available features                                |

 ## Getting Started

```toml
[dependencies]
chunk-batch-rs = { version = "<version>", features = ["<full|csv|json|rdbc-sqlite|logger>"] }
```

Then, on your main.rs:

```rust
# use serde::{Deserialize, Serialize};
# use chunk_batch::{
#     core::{
#         item::ItemProcessorResult,
#         job::JobBuilder,
#         launcher::JobLauncher,
#         parameters::JobParameters,
#         repository::InMemoryJobRepository,
#         step::{BatchStatus, StepBuilder},
#     },
#     error::BatchError,
#     item::csv::csv_reader::CsvItemReaderBuilder,
#     item::json::json_writer::JsonItemWriterBuilder,
# };
# #[derive(Deserialize, Serialize, Debug, Clone)]
# struct Car {
#     year: u16,
#     make: String,
#     model: String,
#     description: String,
# }
fn upper_case(car: &Car) -> ItemProcessorResult<Car> {
    Ok(Some(Car {
        make: car.make.to_uppercase(),
        model: car.model.to_uppercase(),
        ..car.clone()
    }))
}

fn main() -> Result<(), BatchError> {
    let csv = "year,make,model,description
   1948,Porsche,356,Luxury sports car
   1995,Peugeot,205,City car
   2021,Mazda,CX-30,SUV Compact
   1967,Ford,Mustang fastback 1967,American car";

    let reader = CsvItemReaderBuilder::<Car>::new()
        .has_headers(true)
        .from_reader(csv.as_bytes())?;

    let writer = JsonItemWriterBuilder::new().from_writer(Vec::new());

    let step = StepBuilder::new("cars")
        .chunk::<Car, Car>(2) // set commit interval
        .reader(&reader)
        .processor(&upper_case)
        .writer(&writer)
        .skip_limit(2) // set fault tolerance
        .build()?;

    let job = JobBuilder::new().name("cars").start(&step).build()?;

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository).run(&job, &JobParameters::unique())?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.step_executions[0].write_count, 4);

    Ok(())
}
```

 ## Demos
+ `first_batch`: a tasklet counting up to five
+ `file_item_reader`: CSV and JSON readers chained in one job
+ `cursor_item_reader`: a SQLite cursor feeding a logger
+ `paging_item_reader`: keyset and offset pagination over SQLite

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of items readers / writers (for example: csv reader and writer)
pub mod item;
