mod scheduler;
mod unique_work;
