mod ingest;
mod semantic;
