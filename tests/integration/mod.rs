//! Integration tests driving the eco-rail binary

mod helpers;
mod test_graph;
mod test_new;
mod test_release;
