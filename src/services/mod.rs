mod status_writer;

pub use status_writer::KubeStatusWriter;
