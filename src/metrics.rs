// Copyright (C) 2025 the bookden authors
//
// This file is part of bookden.
//
// bookden is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// bookden is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with bookden.  If not,
// see <http://www.gnu.org/licenses/>.

//! # bookden metrics
//!
//! bookden uses [OpenTelemetry] for metrics. OTel instruments are meant to be created once &
//! re-used, which raises the question of where to keep them; a struct field per counter doesn't
//! scale past a handful, and a map keyed by name turns every typo in a metric name into a runtime
//! surprise in some rarely-exercised handler.
//!
//! [OpenTelemetry]: https://docs.rs/opentelemetry/latest/opentelemetry/index.html
//!
//! The compromise here: each collection site registers its metric at link time with
//! [inventory], alongside the code that bumps it:
//!
//! ```ignore
//! inventory::submit! { metrics::Registration::new("reviews.submitted", Sort::IntegralCounter) }
//! // ...
//! counter_add!(state.instruments, "reviews.submitted", 1, &[]);
//! ```
//!
//! [Instruments::new] walks the registry at startup, pre-building every instrument and panicking
//! on a duplicate name, so the name/type errors that a richer type system would catch at compile
//! time at least surface the first time the process boots rather than the first time the code
//! path runs.

use std::collections::{hash_map::Entry, HashMap, HashSet};

use opentelemetry::{
    global,
    metrics::{Counter, Gauge},
    KeyValue,
};

/// Instrument type
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Sort {
    /// `Counter<u64>`
    IntegralCounter,
    /// `Gauge<u64>`
    IntegralGauge,
}

/// A link-time metric registration; see the module docs
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Registration {
    name: &'static str,
    sort: Sort,
}

impl Registration {
    pub const fn new(name: &'static str, sort: Sort) -> Registration {
        Registration { name, sort }
    }
    pub fn name(&self) -> String {
        self.name.to_string()
    }
    pub fn sort(&self) -> Sort {
        self.sort
    }
}

inventory::collect!(Registration);

/// Panic early if two collection sites registered the same metric name
pub fn check_metric_names() {
    let mut names: HashSet<String> = HashSet::new();
    for reg in inventory::iter::<Registration> {
        if !names.insert(reg.name()) {
            panic!("The metric name {} was registered twice", reg.name());
        }
    }
}

enum Instrument {
    CounterU64(Counter<u64>),
    GaugeU64(Gauge<u64>),
}

/// Container for the process's OTel instruments
pub struct Instruments {
    map: HashMap<String, Instrument>,
}

impl Instruments {
    pub fn new(prefix: &'static str) -> Instruments {
        let meter = global::meter(prefix);
        let mut map: HashMap<String, Instrument> = HashMap::new();
        // Pre-building everything at startup means `add` & `record` don't need `&mut self`, so
        // an instance can live happily inside an Arc-ed state struct.
        for reg in inventory::iter::<Registration> {
            let name = reg.name();
            match map.entry(reg.name()) {
                Entry::Occupied(_) => panic!("The metric name {} was registered twice", name),
                Entry::Vacant(slot) => {
                    slot.insert(match reg.sort() {
                        Sort::IntegralCounter => {
                            Instrument::CounterU64(meter.u64_counter(name).build())
                        }
                        Sort::IntegralGauge => Instrument::GaugeU64(meter.u64_gauge(name).build()),
                    });
                }
            }
        }
        Instruments { map }
    }
    // panics if `name` doesn't name a counter
    pub fn add(&self, name: &str, count: u64, attributes: &[KeyValue]) {
        if let Some(Instrument::CounterU64(c)) = self.map.get(name) {
            c.add(count, attributes);
        } else {
            panic!("{} does not name a counter", name);
        }
    }
    // panics if `name` doesn't name a gauge
    pub fn record(&self, name: &str, value: u64, attributes: &[KeyValue]) {
        if let Some(Instrument::GaugeU64(g)) = self.map.get(name) {
            g.record(value, attributes);
        } else {
            panic!("{} does not name a gauge", name);
        }
    }
}

#[macro_export]
macro_rules! counter_add {
    ($instr:expr, $name:expr, $count:expr, $attrs:expr) => {
        $instr.add($name, $count, $attrs);
    };
}
