mod harness;
mod test_cycle;
mod test_server;
mod test_worker;
