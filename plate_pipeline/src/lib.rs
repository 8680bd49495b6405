pub mod plate_recognition;
