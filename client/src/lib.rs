pub mod darray;
